//! 外部发布机制接口定义
//!
//! 发布状态机通过此接口与代码托管端交互：推送分支、开提案或
//! 在已有分支上追加。接口实现只负责一次外部调用的成败，重试、
//! 限速与互斥都由状态机负责。

use crate::models::{ProposalStatus, PublishMode};
use crate::ConductorResult;
use serde::{Deserialize, Serialize};

/// 一次发布调用的输入
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub campaign: String,
    pub target: String,
    pub run_id: String,
    /// 本次实际采用的发布方式
    pub mode: PublishMode,
    /// 派生分支名，按活动命名
    pub branch_name: String,
    /// 若存在开放提案，其外部地址；用于替换而非重复创建
    pub existing_proposal_url: Option<String>,
    pub description: Option<String>,
}

/// 一次成功发布的回执
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishReceipt {
    /// 外部可见的提案或分支地址
    pub url: String,
    /// 发布后提案的初始状态，直接推送视为已合并
    pub status: ProposalStatus,
    /// 实际生效的发布方式，可能与请求不同（尝试推送回退为提案）
    pub mode: PublishMode,
    pub description: Option<String>,
}

/// 外部发布机制接口
///
/// # 错误
///
/// 失败以 `ConductorError::Publish { code, .. }` 返回；状态机对
/// 结果码 `permission-denied` 有专门处理（尝试推送降级为提案），
/// 其余结果码走有界重试。
#[async_trait::async_trait]
pub trait PublishMechanism: Send + Sync {
    async fn publish(&self, request: &PublishRequest) -> ConductorResult<PublishReceipt>;

    /// 查询提案在外部论坛上的当前状态
    ///
    /// 供提案状态监视循环把论坛侧的合并、关闭回写到本地记录。
    async fn check_proposal(&self, url: &str) -> ConductorResult<ProposalStatus>;
}
