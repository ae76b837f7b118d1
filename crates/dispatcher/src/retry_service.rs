//! 运行重试策略
//!
//! 把退避曲线和尝试上限装进一个决策函数；结果摄取与租约回收
//! 两条失败路径共用，保证同一候选项从哪条路径失败判定都一致。

use chrono::{DateTime, Utc};
use conductor_core::{backoff, config::BackoffConfig};

/// 一次重试决策
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// 继续重试，条目在该时间之后重新可调度
    Retry { eligible_at: DateTime<Utc> },
    /// 重试预算用尽，候选项应标记为卡住
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    backoff: BackoffConfig,
    max_attempts: i32,
}

impl RetryPolicy {
    pub fn new(backoff: BackoffConfig, max_attempts: i32) -> Self {
        Self {
            backoff,
            max_attempts,
        }
    }

    /// 根据已完成的尝试次数做重试决策
    ///
    /// `completed_attempts` 是包含本次失败在内已消耗的尝试数，
    /// 同时作为退避指数。
    pub fn decide(&self, completed_attempts: i32, now: DateTime<Utc>) -> RetryDecision {
        if completed_attempts >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            eligible_at: backoff::next_eligible_at(&self.backoff, completed_attempts, now),
        }
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }
}
