//! 运行分配与租约代理
//!
//! Worker 通过协议层调用这里：领取下一个运行、心跳续约、
//! 以及运维吊销租约。分配的互斥完全由仓储层的事务保证，
//! 本层只做载荷组装、计量与候选项触碰。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use conductor_core::{
    models::{AssignRequest, AssignmentPayload, HeartbeatPayload},
    traits::{AssignmentService, CandidateRepository, QueueRepository},
    ConductorError, ConductorResult,
};
use conductor_infrastructure::MetricsCollector;

pub struct AssignmentBroker {
    pub queue_repo: Arc<dyn QueueRepository>,
    pub candidate_repo: Arc<dyn CandidateRepository>,
    pub metrics: Arc<MetricsCollector>,
    lease_ttl_seconds: i64,
    assign_batch_size: i64,
}

impl AssignmentBroker {
    pub fn new(
        queue_repo: Arc<dyn QueueRepository>,
        candidate_repo: Arc<dyn CandidateRepository>,
        metrics: Arc<MetricsCollector>,
        lease_ttl_seconds: i64,
        assign_batch_size: i64,
    ) -> Self {
        Self {
            queue_repo,
            candidate_repo,
            metrics,
            lease_ttl_seconds,
            assign_batch_size,
        }
    }
}

#[async_trait]
impl AssignmentService for AssignmentBroker {
    #[instrument(skip(self, request), fields(worker_id = %request.worker_id))]
    async fn assign(
        &self,
        request: &AssignRequest,
    ) -> ConductorResult<Option<AssignmentPayload>> {
        let now = Utc::now();
        let assignment = self
            .queue_repo
            .assign_next(
                &request.worker_id,
                &request.capabilities,
                self.lease_ttl_seconds,
                self.assign_batch_size,
                now,
            )
            .await?;

        let Some(assignment) = assignment else {
            debug!("队列无可分配条目");
            return Ok(None);
        };

        self.candidate_repo
            .touch_attempt(assignment.candidate.id, now)
            .await?;
        self.metrics
            .record_run_assigned(&assignment.candidate.campaign, &request.worker_id);

        info!(
            "运行已分配: {}/{} -> {} 尝试={}",
            assignment.candidate.campaign,
            assignment.candidate.target,
            request.worker_id,
            assignment.queued_run.attempt_count + 1
        );

        Ok(Some(AssignmentPayload::build(
            &assignment.queued_run,
            &assignment.lease,
            &assignment.candidate,
        )))
    }

    #[instrument(skip(self), fields(lease_id = %lease_id))]
    async fn heartbeat(&self, lease_id: &str) -> ConductorResult<HeartbeatPayload> {
        let lease = self
            .queue_repo
            .renew_lease(lease_id, self.lease_ttl_seconds, Utc::now())
            .await?;

        debug!("租约已续期，新到期时间 {}", lease.expires_at);
        Ok(HeartbeatPayload {
            new_expiry: lease.expires_at,
        })
    }

    #[instrument(skip(self), fields(lease_id = %lease_id))]
    async fn revoke(&self, lease_id: &str) -> ConductorResult<()> {
        let now = Utc::now();
        // 吊销是主动过期：条目立即重新可调度，不走退避
        let revoked = self.queue_repo.revoke_lease(lease_id, now, now).await?;
        if !revoked {
            return Err(ConductorError::UnknownLease {
                lease_id: lease_id.to_string(),
            });
        }

        warn!("租约已被运维吊销");
        Ok(())
    }
}
