//! 数据仓储层接口定义
//!
//! 此模块定义了数据持久化层的核心抽象接口，包括：
//! - 候选项仓储接口 (CandidateRepository)
//! - 队列与租约仓储接口 (QueueRepository)
//! - 运行记录仓储接口 (RunRepository)
//! - 提案仓储接口 (ProposalRepository)
//!
//! ## 设计原则
//!
//! ### 接口隔离
//! 每个仓储接口职责单一，只负责特定实体的数据操作：
//! - `CandidateRepository` - 候选项的摄取与发布退避状态
//! - `QueueRepository` - 排队运行与租约的完整生命周期
//! - `RunRepository` - 只增不删的运行历史
//! - `ProposalRepository` - 提案的创建、替换与状态回写
//!
//! ### 事务边界
//! 跨实体的一致性操作（分配、回收）由单个仓储方法在一个数据库
//! 事务内完成，而不是由调用方拼接多个方法。例如 `assign_next`
//! 在同一事务中完成候选筛选、租约创建、运行记录创建和队列状态
//! 迁移，保证同一目标在任意时刻最多持有一个活跃租约。
//!
//! ### 异步设计
//! 所有数据库操作都是异步的，支持高并发访问：
//! - 使用 `async/await` 语法
//! - 返回 `ConductorResult<T>` 统一错误处理
//! - 实现 `Send + Sync` 确保线程安全
//!
//! ### 抽象解耦
//! 接口与具体实现分离，支持多种数据库后端：
//! - PostgreSQL 实现（生产部署）
//! - SQLite 实现（单机与测试）
//! - 内存实现（单元测试用）
//!
//! ## 使用示例
//!
//! ### 排队与分配
//!
//! ```rust,ignore
//! use conductor_core::traits::{CandidateRepository, QueueRepository};
//! use conductor_core::models::QueuedRun;
//! use chrono::Utc;
//!
//! async fn schedule_one(
//!     candidates: &dyn CandidateRepository,
//!     queue: &dyn QueueRepository,
//! ) -> conductor_core::ConductorResult<()> {
//!     for candidate in candidates.list_unqueued(50).await? {
//!         let entry = QueuedRun::new(&candidate, candidate.priority);
//!         queue.enqueue(&entry).await?;
//!     }
//!
//!     // Worker 侧拉取：同一事务内挑选最高优先级的可分配条目
//!     if let Some(assignment) = queue
//!         .assign_next("worker-001", &[], 300, 50, Utc::now())
//!         .await?
//!     {
//!         println!("分配运行 {}", assignment.lease.run_id);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ### 发布候选查询
//!
//! ```rust,ignore
//! use conductor_core::traits::RunRepository;
//! use chrono::Utc;
//!
//! async fn inspect(runs: &dyn RunRepository) -> conductor_core::ConductorResult<()> {
//!     for item in runs.publish_ready(Utc::now(), 50).await? {
//!         println!("{}/{} 就绪，运行 {}", item.candidate.campaign, item.candidate.target, item.run.id);
//!     }
//!     Ok(())
//! }
//! ```

use crate::models::{Candidate, Lease, Proposal, ProposalStatus, QueuedRun, Run, RunOutcome};
use crate::ConductorResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 一次成功分配的完整结果
///
/// `QueueRepository::assign_next` 在单个事务内产生的三元组，
/// 供协议层组装下发给 Worker 的载荷。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    /// 被分配的队列条目，状态已迁移为 `Assigned`
    pub queued_run: QueuedRun,
    /// 新创建的活跃租约
    pub lease: Lease,
    /// 条目对应的候选项
    pub candidate: Candidate,
}

/// 一条可发布的成功运行及其候选项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishableRun {
    pub candidate: Candidate,
    pub run: Run,
}

/// 候选项仓储接口
///
/// 定义候选项实体的数据访问和持久化操作。候选项是（活动、目标）
/// 二元组下的工作申报，由外部摄取流程写入，再由扫描循环转化为
/// 队列条目。
///
/// # 核心功能
///
/// 1. **摄取** - 以（活动、目标）为键的幂等写入
/// 2. **扫描支持** - 列出尚未排队的候选项
/// 3. **卡住管理** - 永久失败后的标记与人工恢复
/// 4. **发布退避** - 发布失败次数与下次尝试时间的维护
///
/// # 线程安全
///
/// 此trait要求实现 `Send + Sync`，确保可以在多线程环境中安全使用。
#[async_trait]
pub trait CandidateRepository: Send + Sync {
    /// 幂等写入候选项
    ///
    /// 以（活动、目标）为唯一键：不存在则插入，存在则更新命令、
    /// 优先级、发布模式与能力要求，其余运行期状态保持不变。
    ///
    /// # 参数
    ///
    /// * `candidate` - 要写入的候选项，ID字段将被忽略
    ///
    /// # 返回值
    ///
    /// 成功时返回数据库中的最新候选项（含生成的ID）。
    async fn upsert(&self, candidate: &Candidate) -> ConductorResult<Candidate>;

    /// 根据ID获取候选项
    async fn get_by_id(&self, id: i64) -> ConductorResult<Option<Candidate>>;

    /// 根据（活动、目标）键获取候选项
    ///
    /// 这是对外接口最常用的查询路径；两个分量共同构成唯一键。
    async fn get_by_key(&self, campaign: &str, target: &str)
        -> ConductorResult<Option<Candidate>>;

    /// 列出尚未排队的候选项
    ///
    /// 返回没有对应队列条目且未被标记卡住的候选项，供扫描循环
    /// 批量入队。结果按优先级降序排列。
    ///
    /// # 参数
    ///
    /// * `limit` - 单次返回的最大条数
    async fn list_unqueued(&self, limit: i64) -> ConductorResult<Vec<Candidate>>;

    /// 记录一次已完成的尝试时间
    async fn touch_attempt(&self, id: i64, at: DateTime<Utc>) -> ConductorResult<()>;

    /// 将候选项标记为卡住
    ///
    /// 永久失败或发布重试耗尽后调用。卡住的候选项不再被扫描
    /// 循环入队，直到显式恢复。
    ///
    /// # 参数
    ///
    /// * `id` - 候选项ID
    /// * `reason` - 最后一次失败的结果码
    /// * `at` - 标记时间
    async fn mark_stuck(&self, id: i64, reason: &str, at: DateTime<Utc>) -> ConductorResult<()>;

    /// 清除卡住标记，候选项重新参与调度
    async fn clear_stuck(&self, id: i64) -> ConductorResult<()>;

    /// 记录一次失败的发布尝试
    ///
    /// 写入累计发布尝试次数与按退避策略推迟后的下次发布时间。
    async fn set_publish_backoff(
        &self,
        id: i64,
        attempts: i32,
        next_at: DateTime<Utc>,
    ) -> ConductorResult<()>;

    /// 发布成功后清零退避状态
    async fn reset_publish_backoff(&self, id: i64) -> ConductorResult<()>;
}

/// 队列与租约仓储接口
///
/// 管理排队运行从入队、分配、租约续期到释放或回收的完整生命
/// 周期。这是调度核心中一致性要求最高的接口：所有涉及租约状态
/// 迁移的方法都必须以比较并交换的方式实现，使运行器与回收循环
/// 并发竞争同一租约时只有一方胜出。
///
/// # 核心功能
///
/// 1. **入队** - 以候选项为键的挤占式更新
/// 2. **分配** - 单事务内的筛选、租约创建与运行记录创建
/// 3. **租约管理** - 心跳续期、结果释放、过期回收、人工吊销
/// 4. **排队查询** - 供状态接口与监控使用
///
/// # 线程安全
///
/// 此trait要求实现 `Send + Sync`，确保可以在多线程环境中安全使用。
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// 入队或更新队列条目
    ///
    /// 以候选项ID为唯一键：已存在待分配条目时覆盖其优先级、
    /// 生效时间与刷新标记，但保留累计尝试次数；已被分配的条目
    /// 不受影响，直接返回现状。重复申报不会产生重复条目。
    ///
    /// # 参数
    ///
    /// * `entry` - 待写入的队列条目
    ///
    /// # 返回值
    ///
    /// 返回数据库中该候选项对应的最新队列条目。
    async fn enqueue(&self, entry: &QueuedRun) -> ConductorResult<QueuedRun>;

    /// 按候选项查询队列条目
    async fn get_by_candidate(&self, candidate_id: i64) -> ConductorResult<Option<QueuedRun>>;

    /// 分配下一个可执行条目
    ///
    /// 在单个数据库事务中完成：
    /// 1. 按优先级降序、生效时间升序、入队顺序选出待分配条目；
    /// 2. 跳过目标上已有活跃租约的条目（跨活动互斥）；
    /// 3. 跳过能力要求超出 `capabilities` 的条目；
    /// 4. 为选中条目创建租约与进行中的运行记录，并把条目状态
    ///    迁移为 `Assigned`。
    ///
    /// # 参数
    ///
    /// * `worker_id` - 请求分配的 Worker 标识
    /// * `capabilities` - 该 Worker 声明的能力集合
    /// * `lease_ttl_seconds` - 租约有效期（秒）
    /// * `scan_limit` - 能力过滤时单次检查的队首条目数上限
    /// * `now` - 当前时间，生效时间晚于它的条目不参与分配
    ///
    /// # 返回值
    ///
    /// 有可分配条目时返回 `Some(Assignment)`，队列为空或全部
    /// 被排除时返回 `None`。
    async fn assign_next(
        &self,
        worker_id: &str,
        capabilities: &[String],
        lease_ttl_seconds: i64,
        scan_limit: i64,
        now: DateTime<Utc>,
    ) -> ConductorResult<Option<Assignment>>;

    /// 根据ID获取租约（任意状态）
    async fn get_lease(&self, lease_id: &str) -> ConductorResult<Option<Lease>>;

    /// 列出已过期但尚未回收的活跃租约
    async fn list_expired_leases(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> ConductorResult<Vec<Lease>>;

    /// 续期租约
    ///
    /// 仅对未过期的活跃租约生效，从当前时间起重新计算有效期。
    ///
    /// # 错误
    ///
    /// * `UnknownLease` - 租约不存在
    /// * `LeaseExpired` - 租约已过期、已释放或已被回收
    async fn renew_lease(
        &self,
        lease_id: &str,
        ttl_seconds: i64,
        now: DateTime<Utc>,
    ) -> ConductorResult<Lease>;

    /// 释放租约
    ///
    /// 结果被接受时调用。以比较并交换方式把活跃且未过期的租约
    /// 迁移为 `Released`，并返回释放后的租约供调用方定位运行
    /// 记录与队列条目。与回收循环竞争时恰有一方成功。
    ///
    /// # 错误
    ///
    /// * `UnknownLease` - 租约不存在
    /// * `LeaseExpired` - 租约已过期、已释放或已被回收
    async fn release_lease(&self, lease_id: &str, now: DateTime<Utc>) -> ConductorResult<Lease>;

    /// 回收单个过期租约
    ///
    /// 在单个事务中把仍处于活跃状态的过期租约迁移为 `Reclaimed`，
    /// 将其孤儿运行以 `lease-expired` 终结为暂时性失败，并把队列
    /// 条目重置为待分配、尝试次数加一、生效时间推迟到 `eligible_at`。
    ///
    /// 方法是幂等的：租约已被释放、已被回收或尚未过期时不做任何
    /// 修改并返回 `false`。
    ///
    /// # 参数
    ///
    /// * `lease_id` - 要回收的租约
    /// * `now` - 当前时间
    /// * `eligible_at` - 重新入队后的生效时间（由退避策略计算）
    async fn reclaim_lease(
        &self,
        lease_id: &str,
        now: DateTime<Utc>,
        eligible_at: DateTime<Utc>,
    ) -> ConductorResult<bool>;

    /// 吊销租约
    ///
    /// 运维接口。与 [`reclaim_lease`](Self::reclaim_lease) 语义相同，
    /// 但不要求租约已过期，对任意活跃租约立即生效。
    async fn revoke_lease(
        &self,
        lease_id: &str,
        now: DateTime<Utc>,
        eligible_at: DateTime<Utc>,
    ) -> ConductorResult<bool>;

    /// 终态结果后删除队列条目
    async fn remove(&self, queued_run_id: i64) -> ConductorResult<()>;

    /// 暂时性失败后重新排队
    ///
    /// 把已分配的条目重置为待分配，尝试次数加一，生效时间推迟
    /// 到 `eligible_at`。
    async fn requeue_transient(
        &self,
        queued_run_id: i64,
        eligible_at: DateTime<Utc>,
    ) -> ConductorResult<()>;

    /// 待分配条目总数
    async fn pending_count(&self) -> ConductorResult<i64>;
}

/// 运行记录仓储接口
///
/// 运行历史是只增账本：记录在分配时创建，终结恰好一次，之后
/// 不再修改。创建发生在 `QueueRepository::assign_next` 的分配
/// 事务内，本接口只负责查询与终结。
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// 根据ID获取运行记录
    async fn get_by_id(&self, run_id: &str) -> ConductorResult<Option<Run>>;

    /// 终结运行
    ///
    /// 仅对尚未终结的记录生效，写入结果分类、结果码与产物后
    /// 记录即为不可变。
    ///
    /// # 错误
    ///
    /// * `RunNotFound` - 记录不存在
    /// * `Internal` - 记录已被终结，重复终结说明上游租约校验失效
    #[allow(clippy::too_many_arguments)]
    async fn finalize(
        &self,
        run_id: &str,
        outcome: RunOutcome,
        code: &str,
        description: Option<&str>,
        artifacts: &serde_json::Value,
        log_ref: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> ConductorResult<Run>;

    /// 列出候选项的运行历史，按开始时间降序
    async fn list_for_candidate(&self, candidate_id: i64, limit: i64)
        -> ConductorResult<Vec<Run>>;

    /// 候选项最近一次成功运行
    async fn latest_success_for_candidate(&self, candidate_id: i64)
        -> ConductorResult<Option<Run>>;

    /// 列出就绪待发布的成功运行
    ///
    /// 条件：候选项的最近一次已终结运行是成功的、发布模式需要
    /// 发布、未被标记卡住、发布退避时间已到，且该运行还没有
    /// 对应提案。结果按候选项优先级降序排列。
    async fn publish_ready(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> ConductorResult<Vec<PublishableRun>>;
}

/// 提案仓储接口
///
/// 同一（活动、目标）最多保留一个开放提案。后续成功运行通过
/// `supersede` 以关旧开新的方式替换提案，不产生重复。
#[async_trait]
pub trait ProposalRepository: Send + Sync {
    /// 创建提案
    async fn create(&self, proposal: &Proposal) -> ConductorResult<Proposal>;

    /// 根据ID获取提案
    async fn get_by_id(&self, id: i64) -> ConductorResult<Option<Proposal>>;

    /// 获取（活动、目标）下的开放提案
    async fn get_open_for(
        &self,
        campaign: &str,
        target: &str,
    ) -> ConductorResult<Option<Proposal>>;

    /// 以新提案替换旧提案
    ///
    /// 单事务内把旧提案置为 `Closed` 并插入新提案。旧提案已非
    /// 开放状态时仍插入新提案，保持幂等。
    async fn supersede(&self, old_id: i64, replacement: &Proposal) -> ConductorResult<Proposal>;

    /// 回写外部论坛上观察到的提案状态
    async fn update_status(
        &self,
        id: i64,
        status: ProposalStatus,
        at: DateTime<Utc>,
    ) -> ConductorResult<()>;

    /// 仅刷新最近检查时间
    async fn touch_checked(&self, id: i64, at: DateTime<Utc>) -> ConductorResult<()>;

    /// 列出开放提案，最久未检查的在前
    async fn list_open(&self, limit: i64) -> ConductorResult<Vec<Proposal>>;

    /// 列出给定时刻之后创建的提案
    ///
    /// 供速率限制器计算滑动窗口内的发布次数，窗口通常不超过
    /// 若干小时，结果集有界。
    async fn list_created_since(&self, since: DateTime<Utc>) -> ConductorResult<Vec<Proposal>>;
}
