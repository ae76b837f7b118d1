//! 过期租约回收
//!
//! 后台循环扫描到期未续约的活跃租约并逐个回收：孤儿运行以
//! `lease-expired` 终结为瞬时失败，队列条目带退避重新排队。
//! 回收以比较并交换实现，与迟到的结果提交竞争同一租约时恰有
//! 一方胜出，重复回收是无害的空操作。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use conductor_core::{
    models::Lease,
    traits::{CandidateRepository, QueueRepository},
    ConductorResult,
};
use conductor_infrastructure::MetricsCollector;

use crate::ingestion::MAX_ATTEMPTS_STUCK_REASON;
use crate::retry_service::{RetryDecision, RetryPolicy};

pub struct LeaseReclaimer {
    pub queue_repo: Arc<dyn QueueRepository>,
    pub candidate_repo: Arc<dyn CandidateRepository>,
    pub metrics: Arc<MetricsCollector>,
    retry_policy: RetryPolicy,
    batch_size: i64,
}

impl LeaseReclaimer {
    pub fn new(
        queue_repo: Arc<dyn QueueRepository>,
        candidate_repo: Arc<dyn CandidateRepository>,
        metrics: Arc<MetricsCollector>,
        retry_policy: RetryPolicy,
        batch_size: i64,
    ) -> Self {
        Self {
            queue_repo,
            candidate_repo,
            metrics,
            retry_policy,
            batch_size,
        }
    }

    /// 执行一轮回收，返回实际回收的租约数
    ///
    /// 单个租约的失败只记日志，不中断本轮其余租约的处理。
    #[instrument(skip(self))]
    pub async fn reclaim_once(&self, now: DateTime<Utc>) -> ConductorResult<usize> {
        let expired = self
            .queue_repo
            .list_expired_leases(now, self.batch_size)
            .await?;
        if expired.is_empty() {
            return Ok(0);
        }

        let mut reclaimed = 0;
        for lease in expired {
            match self.reclaim_one(&lease, now).await {
                Ok(true) => reclaimed += 1,
                Ok(false) => {}
                Err(e) => {
                    error!("回收租约失败: {}: {}", lease.id, e);
                }
            }
        }

        if reclaimed > 0 {
            info!("本轮回收 {} 个过期租约", reclaimed);
        }
        Ok(reclaimed)
    }

    async fn reclaim_one(&self, lease: &Lease, now: DateTime<Utc>) -> ConductorResult<bool> {
        // 回收会把条目尝试次数加一，退避指数按加一后的值计算
        let entry = self.queue_repo.get_by_candidate(lease.candidate_id).await?;
        let attempts_after = entry.as_ref().map(|e| e.attempt_count + 1).unwrap_or(1);

        match self.retry_policy.decide(attempts_after, now) {
            RetryDecision::Retry { eligible_at } => {
                let won = self
                    .queue_repo
                    .reclaim_lease(&lease.id, now, eligible_at)
                    .await?;
                if won {
                    self.metrics.record_lease_reclaimed(&lease.worker_id);
                    warn!(
                        "租约过期已回收: {} worker={} 生效时间={}",
                        lease.id, lease.worker_id, eligible_at
                    );
                }
                Ok(won)
            }
            RetryDecision::GiveUp => {
                // 仍需回收以终结孤儿运行，随后清队并标记卡住
                let won = self.queue_repo.reclaim_lease(&lease.id, now, now).await?;
                if won {
                    self.metrics.record_lease_reclaimed(&lease.worker_id);
                    self.candidate_repo
                        .mark_stuck(lease.candidate_id, MAX_ATTEMPTS_STUCK_REASON, now)
                        .await?;
                    if let Some(entry) = entry {
                        self.queue_repo.remove(entry.id).await?;
                    }
                    warn!(
                        "租约过期且重试预算耗尽: {} 目标={}",
                        lease.id, lease.target
                    );
                }
                Ok(won)
            }
        }
    }
}
