//! 结果摄取
//!
//! Worker 上报的终态结果从这里入库。先以比较并交换释放租约，
//! 把迟到与重复的提交挡在账本之外，再终结运行并按归类决定
//! 候选项的去向：成功清队、瞬时失败按退避重排、永久失败标记
//! 卡住。
//!
//! 释放租约与终结运行是两步操作，但释放的互斥保证了终结至多
//! 被触发一次；`RunRepository::finalize` 的恰好一次约束是最后
//! 一道防线。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{info, instrument, warn};

use conductor_core::{
    models::{ResultAccepted, ResultSubmission, RunOutcome},
    traits::{CandidateRepository, QueueRepository, ResultIngestionService, RunRepository},
    ConductorResult,
};
use conductor_infrastructure::MetricsCollector;

use crate::retry_service::{RetryDecision, RetryPolicy};

/// 瞬时失败重试预算耗尽后写入候选项的卡住原因
pub const MAX_ATTEMPTS_STUCK_REASON: &str = "max-run-attempts-exceeded";

pub struct ResultIngestion {
    pub queue_repo: Arc<dyn QueueRepository>,
    pub run_repo: Arc<dyn RunRepository>,
    pub candidate_repo: Arc<dyn CandidateRepository>,
    pub metrics: Arc<MetricsCollector>,
    retry_policy: RetryPolicy,
    extra_transient_codes: Vec<String>,
}

impl ResultIngestion {
    pub fn new(
        queue_repo: Arc<dyn QueueRepository>,
        run_repo: Arc<dyn RunRepository>,
        candidate_repo: Arc<dyn CandidateRepository>,
        metrics: Arc<MetricsCollector>,
        retry_policy: RetryPolicy,
        extra_transient_codes: Vec<String>,
    ) -> Self {
        Self {
            queue_repo,
            run_repo,
            candidate_repo,
            metrics,
            retry_policy,
            extra_transient_codes,
        }
    }
}

#[async_trait]
impl ResultIngestionService for ResultIngestion {
    #[instrument(skip(self, submission), fields(lease_id = %lease_id, code = %submission.code))]
    async fn submit_result(
        &self,
        lease_id: &str,
        submission: &ResultSubmission,
    ) -> ConductorResult<ResultAccepted> {
        let now = Utc::now();

        // 租约已被回收或已释放时在此返回 LeaseExpired，结果被拒收
        let lease = self.queue_repo.release_lease(lease_id, now).await?;

        let outcome = RunOutcome::classify(&submission.code, &self.extra_transient_codes);
        let artifacts = submission.artifacts.clone().unwrap_or(Value::Null);
        let run = self
            .run_repo
            .finalize(
                &lease.run_id,
                outcome,
                &submission.code,
                submission.description.as_deref(),
                &artifacts,
                submission.log_ref.as_deref(),
                now,
            )
            .await?;

        self.candidate_repo
            .touch_attempt(lease.candidate_id, now)
            .await?;

        match outcome {
            RunOutcome::Success => {
                self.queue_repo.remove(lease.queued_run_id).await?;
                info!("运行成功: {}/{} 运行={}", run.campaign, run.target, run.id);
            }
            RunOutcome::TransientFailure => match self.retry_policy.decide(run.attempt, now) {
                RetryDecision::Retry { eligible_at } => {
                    self.queue_repo
                        .requeue_transient(lease.queued_run_id, eligible_at)
                        .await?;
                    self.metrics.record_run_retry(&run.campaign, run.attempt);
                    info!(
                        "瞬时失败已重排: {}/{} 码={} 生效时间={}",
                        run.campaign, run.target, submission.code, eligible_at
                    );
                }
                RetryDecision::GiveUp => {
                    self.candidate_repo
                        .mark_stuck(lease.candidate_id, MAX_ATTEMPTS_STUCK_REASON, now)
                        .await?;
                    self.queue_repo.remove(lease.queued_run_id).await?;
                    warn!(
                        "瞬时失败重试预算耗尽: {}/{} 尝试={}",
                        run.campaign, run.target, run.attempt
                    );
                }
            },
            RunOutcome::PermanentFailure => {
                self.candidate_repo
                    .mark_stuck(lease.candidate_id, &submission.code, now)
                    .await?;
                self.queue_repo.remove(lease.queued_run_id).await?;
                warn!(
                    "永久失败: {}/{} 码={}",
                    run.campaign, run.target, submission.code
                );
            }
        }

        let duration_seconds = run
            .duration_ms()
            .map(|ms| ms as f64 / 1000.0)
            .unwrap_or(0.0);
        let outcome_label = match outcome {
            RunOutcome::Success => "success",
            RunOutcome::TransientFailure => "transient-failure",
            RunOutcome::PermanentFailure => "permanent-failure",
        };
        self.metrics
            .record_run_finalized(&run.campaign, outcome_label, duration_seconds);

        Ok(ResultAccepted { run_id: run.id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::config::BackoffConfig;
    use conductor_core::models::{QueuedRun, QueuedRunStatus};
    use conductor_core::ConductorError;
    use conductor_testing_utils::builders::CandidateBuilder;
    use conductor_testing_utils::mocks::{
        MockCandidateRepository, MockQueueRepository, MockRunRepository,
    };

    fn deterministic_backoff() -> BackoffConfig {
        BackoffConfig {
            base_delay_seconds: 60.0,
            multiplier: 2.0,
            cap_seconds: 3600.0,
            jitter: 0.0,
        }
    }

    struct Fixture {
        queue: MockQueueRepository,
        runs: MockRunRepository,
        candidates: MockCandidateRepository,
        ingestion: ResultIngestion,
    }

    async fn assigned_fixture(max_attempts: i32, lease_ttl_seconds: i64) -> (Fixture, String) {
        let candidate = CandidateBuilder::new()
            .with_id(1)
            .with_campaign("lintian-fixes")
            .with_target("example.org/a")
            .build();
        let candidates = MockCandidateRepository::with_candidates(vec![candidate.clone()]);
        let runs = MockRunRepository::new();
        let queue = MockQueueRepository::with_run_repository(runs.clone());
        queue.add_candidate(candidate.clone());
        queue.enqueue(&QueuedRun::new(&candidate, 0)).await.unwrap();

        let assignment = queue
            .assign_next("worker-1", &[], lease_ttl_seconds, 50, Utc::now())
            .await
            .unwrap()
            .expect("expected an assignment");

        let ingestion = ResultIngestion::new(
            Arc::new(queue.clone()),
            Arc::new(runs.clone()),
            Arc::new(candidates.clone()),
            Arc::new(MetricsCollector::new().unwrap()),
            RetryPolicy::new(deterministic_backoff(), max_attempts),
            vec![],
        );

        (
            Fixture {
                queue,
                runs,
                candidates,
                ingestion,
            },
            assignment.lease.id,
        )
    }

    #[tokio::test]
    async fn test_successful_result_finalizes_run_and_clears_queue() {
        let (fixture, lease_id) = assigned_fixture(10, 300).await;

        let accepted = fixture
            .ingestion
            .submit_result(&lease_id, &ResultSubmission::success())
            .await
            .unwrap();

        let run = &fixture.runs.all_runs()[0];
        assert_eq!(accepted.run_id, run.id);
        assert_eq!(run.outcome, Some(RunOutcome::Success));
        assert!(fixture.queue.all_entries().is_empty());
        assert!(fixture.candidates.all_candidates()[0].last_attempt_at.is_some());
    }

    #[tokio::test]
    async fn test_transient_failure_requeues_with_backoff() {
        let (fixture, lease_id) = assigned_fixture(10, 300).await;
        let before = Utc::now();

        fixture
            .ingestion
            .submit_result(&lease_id, &ResultSubmission::failure("worker-timeout", "sandbox died"))
            .await
            .unwrap();

        let entries = fixture.queue.all_entries();
        assert_eq!(entries[0].status, QueuedRunStatus::Pending);
        assert_eq!(entries[0].attempt_count, 1);
        // 首次重试延迟 base * multiplier = 120 秒
        assert!(entries[0].eligible_at > before + chrono::Duration::seconds(100));

        let run = &fixture.runs.all_runs()[0];
        assert_eq!(run.outcome, Some(RunOutcome::TransientFailure));
        assert!(!fixture.candidates.all_candidates()[0].stuck);
    }

    #[tokio::test]
    async fn test_permanent_failure_marks_candidate_stuck() {
        let (fixture, lease_id) = assigned_fixture(10, 300).await;

        fixture
            .ingestion
            .submit_result(
                &lease_id,
                &ResultSubmission::failure("patch-does-not-apply", "hunk rejected"),
            )
            .await
            .unwrap();

        let candidate = &fixture.candidates.all_candidates()[0];
        assert!(candidate.stuck);
        assert_eq!(candidate.stuck_reason.as_deref(), Some("patch-does-not-apply"));
        assert!(fixture.queue.all_entries().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retry_budget_marks_candidate_stuck() {
        let (fixture, lease_id) = assigned_fixture(1, 300).await;

        fixture
            .ingestion
            .submit_result(&lease_id, &ResultSubmission::failure("worker-timeout", "sandbox died"))
            .await
            .unwrap();

        let candidate = &fixture.candidates.all_candidates()[0];
        assert!(candidate.stuck);
        assert_eq!(candidate.stuck_reason.as_deref(), Some(MAX_ATTEMPTS_STUCK_REASON));
        assert!(fixture.queue.all_entries().is_empty());
    }

    #[tokio::test]
    async fn test_late_result_after_reclaim_is_rejected() {
        // 租约即刻过期，模拟 Worker 失联后回收循环先行处理
        let (fixture, lease_id) = assigned_fixture(10, 0).await;
        let now = Utc::now();

        let reclaimed = fixture.queue.reclaim_lease(&lease_id, now, now).await.unwrap();
        assert!(reclaimed);

        let result = fixture
            .ingestion
            .submit_result(&lease_id, &ResultSubmission::success())
            .await;
        assert!(matches!(result, Err(ConductorError::LeaseExpired { .. })));

        // 孤儿运行已由回收方以 lease-expired 终结，迟到结果不再改写
        let run = &fixture.runs.all_runs()[0];
        assert_eq!(run.code.as_deref(), Some("lease-expired"));
        assert_eq!(run.outcome, Some(RunOutcome::TransientFailure));
        assert_eq!(fixture.queue.all_entries()[0].attempt_count, 1);
    }

    #[tokio::test]
    async fn test_duplicate_submission_is_rejected() {
        let (fixture, lease_id) = assigned_fixture(10, 300).await;

        fixture
            .ingestion
            .submit_result(&lease_id, &ResultSubmission::success())
            .await
            .unwrap();

        let second = fixture
            .ingestion
            .submit_result(&lease_id, &ResultSubmission::success())
            .await;
        assert!(matches!(second, Err(ConductorError::LeaseExpired { .. })));
    }

    #[tokio::test]
    async fn test_unknown_lease_is_rejected() {
        let (fixture, _) = assigned_fixture(10, 300).await;

        let result = fixture
            .ingestion
            .submit_result("no-such-lease", &ResultSubmission::success())
            .await;
        assert!(matches!(result, Err(ConductorError::UnknownLease { .. })));
    }
}
