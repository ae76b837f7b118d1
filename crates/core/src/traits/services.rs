use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    models::{
        AssignRequest, AssignmentPayload, HeartbeatPayload, Proposal, ResultAccepted,
        ResultSubmission,
    },
    ConductorResult,
};

/// 发布被推迟的原因
///
/// 推迟不计入失败次数，候选项保持可发布状态等待下一轮扫描。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeferredReason {
    /// 目标锁被其他发布持有
    LockContended { key: String },
    /// 速率桶已满
    RateLimited { bucket: String },
}

/// 一次发布决策的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PublishOutcome {
    /// 发布成功，返回记录在案的提案
    Published(Proposal),
    /// 本轮推迟，稍后重试
    Deferred(DeferredReason),
    /// 无需发布（模式不发布、无成功运行或提案已是最新）
    Skipped(String),
    /// 外部发布失败，已计入重试预算
    Failed { code: String, description: String },
}

/// 运行分配服务接口
#[async_trait]
pub trait AssignmentService: Send + Sync {
    /// 为 Worker 分配下一个运行，队列为空时返回 `None`
    async fn assign(&self, request: &AssignRequest)
        -> ConductorResult<Option<AssignmentPayload>>;

    /// 心跳续期租约，返回新的过期时间
    async fn heartbeat(&self, lease_id: &str) -> ConductorResult<HeartbeatPayload>;

    /// 运维吊销租约，运行立即回收重排
    async fn revoke(&self, lease_id: &str) -> ConductorResult<()>;
}

/// 结果摄取服务接口
#[async_trait]
pub trait ResultIngestionService: Send + Sync {
    /// 接收 Worker 提交的运行结果
    ///
    /// 校验租约、恰好一次地终结运行，并按结果分类决定重排、
    /// 清队或标记卡住。
    async fn submit_result(
        &self,
        lease_id: &str,
        submission: &ResultSubmission,
    ) -> ConductorResult<ResultAccepted>;
}

/// 发布协调服务接口
#[async_trait]
pub trait PublishService: Send + Sync {
    /// 对单个候选项做一次发布决策
    async fn consider_publish(
        &self,
        campaign: &str,
        target: &str,
    ) -> ConductorResult<PublishOutcome>;

    /// 扫描全部就绪运行并逐个发布
    async fn scan_and_publish(&self) -> ConductorResult<Vec<PublishOutcome>>;
}
