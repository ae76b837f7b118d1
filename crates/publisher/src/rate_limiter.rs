//! 发布速率限制
//!
//! 速率桶不落库，每次判定从提案历史即时推导：窗口内该host新建
//! 的提案数，以及该host当前开放的提案总数，任一达到预算即超限。
//! 判定与发布之间由目标锁串住，不存在写偏斜。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use conductor_core::{
    config::RateLimitConfig,
    models::target_host,
    traits::ProposalRepository,
    ConductorResult,
};

/// 开放提案计数时的单次取数上限
///
/// 每个host的开放提案数本身有预算约束，全量在这一数量级之内。
const OPEN_SCAN_LIMIT: i64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    /// 超限，`bucket` 标识触发的预算桶
    Limited { bucket: String },
}

/// 发布速率限制接口
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// 判定向给定host发布是否在预算内
    async fn check(&self, host: &str, now: DateTime<Utc>) -> ConductorResult<RateLimitDecision>;
}

/// 基于提案历史的滑动窗口限制器
pub struct SlidingWindowRateLimiter {
    proposal_repo: Arc<dyn ProposalRepository>,
    config: RateLimitConfig,
}

impl SlidingWindowRateLimiter {
    pub fn new(proposal_repo: Arc<dyn ProposalRepository>, config: RateLimitConfig) -> Self {
        Self {
            proposal_repo,
            config,
        }
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowRateLimiter {
    async fn check(&self, host: &str, now: DateTime<Utc>) -> ConductorResult<RateLimitDecision> {
        let window_start = now - Duration::seconds(self.config.window_seconds);
        let recent = self.proposal_repo.list_created_since(window_start).await?;
        let recent_for_host = recent
            .iter()
            .filter(|p| target_host(&p.target) == host)
            .count() as i64;
        if recent_for_host >= self.config.max_proposals_per_window {
            return Ok(RateLimitDecision::Limited {
                bucket: format!("{host}:window"),
            });
        }

        let open = self.proposal_repo.list_open(OPEN_SCAN_LIMIT).await?;
        let open_for_host = open
            .iter()
            .filter(|p| target_host(&p.target) == host)
            .count() as i64;
        if open_for_host >= self.config.max_open_proposals {
            return Ok(RateLimitDecision::Limited {
                bucket: format!("{host}:open"),
            });
        }

        Ok(RateLimitDecision::Allowed)
    }
}
