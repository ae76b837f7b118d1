//! 控制面全链路集成测试
//!
//! 建在临时文件SQLite库上，把调度面与发布面的真实服务串起来
//! 走完整生命周期：扫描入队 → 分配 → 心跳 → 结果摄取 → 发布
//! 决策。发布机制用可编排的内存网关，锁用内存实现。

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};

use conductor_core::{
    AssignRequest, AssignmentService, BackoffConfig, Candidate, ConductorError, PublishMode,
    PublishOutcome, PublishService, PublisherConfig, QueuedRunStatus, RateLimitConfig,
    ResultIngestionService, ResultSubmission, RunOutcome, StoreConfig,
};
use conductor_dispatcher::{AssignmentBroker, LeaseReclaimer, QueueManager, ResultIngestion, RetryPolicy};
use conductor_infrastructure::{DatabaseManager, MemoryLockService, MetricsCollector};
use conductor_publisher::{PublishStateMachine, SlidingWindowRateLimiter};
use conductor_testing_utils::builders::CandidateBuilder;
use conductor_testing_utils::mocks::MockPublishMechanism;

const CAMPAIGN: &str = "lintian-fixes";
const TARGET: &str = "salsa.debian.org/jelmer/dulwich";

/// 全链路测试夹具：SQLite仓储 + 真实服务 + 内存锁与发布网关
struct ControlPlane {
    _dir: tempfile::TempDir,
    db: DatabaseManager,
    queue_manager: QueueManager,
    broker: AssignmentBroker,
    ingestion: ResultIngestion,
    reclaimer: LeaseReclaimer,
    state_machine: PublishStateMachine,
    mechanism: Arc<MockPublishMechanism>,
}

fn backoff() -> BackoffConfig {
    BackoffConfig {
        base_delay_seconds: 60.0,
        multiplier: 2.0,
        cap_seconds: 3600.0,
        jitter: 0.0,
    }
}

fn publisher_config() -> PublisherConfig {
    PublisherConfig {
        enabled: true,
        bind_address: "127.0.0.1:0".to_string(),
        publish_gateway_url: "http://127.0.0.1:9914".to_string(),
        scan_interval_seconds: 300,
        batch_size: 50,
        max_publish_attempts: 6,
        proposal_check_interval_seconds: 900,
        proposal_check_batch: 10,
        refresh_priority_boost: 2,
        branch_prefix: "conductor".to_string(),
    }
}

async fn control_plane(lease_ttl_seconds: i64) -> Result<ControlPlane> {
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite:{}", dir.path().join("conductor_e2e.db").display());
    let store = StoreConfig {
        url,
        max_connections: 1,
        min_connections: 1,
        connection_timeout_seconds: 5,
        idle_timeout_seconds: 60,
    };
    let db = DatabaseManager::new(&store).await?;

    let candidate_repo = db.candidate_repository();
    let queue_repo = db.queue_repository();
    let run_repo = db.run_repository();
    let proposal_repo = db.proposal_repository();
    let metrics = Arc::new(MetricsCollector::new()?);
    let retry_policy = RetryPolicy::new(backoff(), 10);

    let queue_manager = QueueManager::new(
        candidate_repo.clone(),
        queue_repo.clone(),
        metrics.clone(),
        50,
    );
    let broker = AssignmentBroker::new(
        queue_repo.clone(),
        candidate_repo.clone(),
        metrics.clone(),
        lease_ttl_seconds,
        50,
    );
    let ingestion = ResultIngestion::new(
        queue_repo.clone(),
        run_repo.clone(),
        candidate_repo.clone(),
        metrics.clone(),
        retry_policy.clone(),
        vec![],
    );
    let reclaimer = LeaseReclaimer::new(
        queue_repo.clone(),
        candidate_repo.clone(),
        metrics.clone(),
        retry_policy,
        50,
    );

    let mechanism = Arc::new(MockPublishMechanism::new());
    mechanism.succeed_with(
        "https://salsa.debian.org/jelmer/dulwich/-/merge_requests/1",
        PublishMode::Propose,
    );
    let rate_limit = RateLimitConfig {
        window_seconds: 3600,
        max_proposals_per_window: 12,
        max_open_proposals: 40,
    };
    let state_machine = PublishStateMachine::new(
        candidate_repo,
        run_repo,
        proposal_repo.clone(),
        Arc::new(MemoryLockService::new()),
        mechanism.clone(),
        Arc::new(SlidingWindowRateLimiter::new(proposal_repo, rate_limit)),
        metrics,
        &publisher_config(),
        backoff(),
        30,
    );

    Ok(ControlPlane {
        _dir: dir,
        db,
        queue_manager,
        broker,
        ingestion,
        reclaimer,
        state_machine,
        mechanism,
    })
}

impl ControlPlane {
    async fn seed_candidate(&self, priority: i32) -> Result<Candidate> {
        let candidate = CandidateBuilder::new()
            .with_campaign(CAMPAIGN)
            .with_target(TARGET)
            .with_command("fix-all")
            .with_priority(priority)
            .build();
        Ok(self.db.candidate_repository().upsert(&candidate).await?)
    }

    async fn assign(&self) -> Result<Option<conductor_core::AssignmentPayload>> {
        let request = AssignRequest {
            worker_id: "worker-1".to_string(),
            capabilities: vec![],
        };
        Ok(self.broker.assign(&request).await?)
    }
}

#[tokio::test]
async fn test_full_lifecycle_success_to_single_proposal() -> Result<()> {
    let plane = control_plane(300).await?;
    let candidate = plane.seed_candidate(5).await?;

    // 扫描循环把候选项放进队列
    assert_eq!(plane.queue_manager.scan_and_enqueue().await?, 1);

    // Worker领取分配并执行期间心跳续约
    let payload = plane.assign().await?.expect("expected an assignment");
    assert_eq!(payload.candidate.campaign, CAMPAIGN);
    assert_eq!(payload.candidate.command, "fix-all");
    let renewed = plane.broker.heartbeat(&payload.lease_id).await?;
    assert!(renewed.new_expiry > Utc::now());

    // 同一目标在租约存续期间不可再分配
    assert!(plane.assign().await?.is_none());

    // 成功结果进入发布扫描
    let accepted = plane
        .ingestion
        .submit_result(&payload.lease_id, &ResultSubmission::success())
        .await?;
    assert_eq!(accepted.run_id, payload.run_id);

    let outcomes = plane.state_machine.scan_and_publish().await?;
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], PublishOutcome::Published(_)));
    assert_eq!(plane.mechanism.request_count(), 1);

    let open = plane
        .db
        .proposal_repository()
        .get_open_for(CAMPAIGN, TARGET)
        .await?
        .expect("expected an open proposal");
    assert_eq!(open.candidate_id, candidate.id);

    // 同一运行再次扫描不产生第二个提案
    let outcomes = plane.state_machine.scan_and_publish().await?;
    assert!(outcomes
        .iter()
        .all(|o| !matches!(o, PublishOutcome::Published(_))));
    assert_eq!(plane.mechanism.request_count(), 1);

    Ok(())
}

#[tokio::test]
async fn test_manual_consider_publish_is_idempotent() -> Result<()> {
    let plane = control_plane(300).await?;
    plane.seed_candidate(0).await?;

    plane.queue_manager.scan_and_enqueue().await?;
    let payload = plane.assign().await?.expect("expected an assignment");
    plane
        .ingestion
        .submit_result(&payload.lease_id, &ResultSubmission::success())
        .await?;

    let first = plane.state_machine.consider_publish(CAMPAIGN, TARGET).await?;
    assert!(matches!(first, PublishOutcome::Published(_)));

    let second = plane.state_machine.consider_publish(CAMPAIGN, TARGET).await?;
    assert!(matches!(second, PublishOutcome::Skipped(_)));
    assert_eq!(plane.mechanism.request_count(), 1);

    Ok(())
}

#[tokio::test]
async fn test_transient_failure_requeues_with_future_eligibility() -> Result<()> {
    let plane = control_plane(300).await?;
    let candidate = plane.seed_candidate(0).await?;

    plane.queue_manager.scan_and_enqueue().await?;
    let payload = plane.assign().await?.expect("expected an assignment");

    plane
        .ingestion
        .submit_result(
            &payload.lease_id,
            &ResultSubmission::failure("worker-failure", "chroot broke"),
        )
        .await?;

    let run = plane
        .db
        .run_repository()
        .get_by_id(&payload.run_id)
        .await?
        .expect("run should be finalized");
    assert_eq!(run.outcome, Some(RunOutcome::TransientFailure));

    // 条目回到pending，尝试数+1，生效时间落在退避窗口之后
    let entry = plane
        .db
        .queue_repository()
        .get_by_candidate(candidate.id)
        .await?
        .expect("entry should be requeued");
    assert_eq!(entry.status, QueuedRunStatus::Pending);
    assert_eq!(entry.attempt_count, 1);
    assert!(entry.eligible_at > Utc::now());

    // 退避期内不可再分配
    assert!(plane.assign().await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_expired_lease_reclaim_rejects_late_result() -> Result<()> {
    // 租约1秒，模拟Worker失联90秒后的回收周期
    let plane = control_plane(1).await?;
    let candidate = plane.seed_candidate(5).await?;

    plane.queue_manager.scan_and_enqueue().await?;
    let payload = plane.assign().await?.expect("expected an assignment");

    let reclaimed = plane
        .reclaimer
        .reclaim_once(Utc::now() + Duration::seconds(90))
        .await?;
    assert_eq!(reclaimed, 1);

    // 重复回收是幂等的
    let again = plane
        .reclaimer
        .reclaim_once(Utc::now() + Duration::seconds(120))
        .await?;
    assert_eq!(again, 0);

    let entry = plane
        .db
        .queue_repository()
        .get_by_candidate(candidate.id)
        .await?
        .expect("entry should survive reclaim");
    assert_eq!(entry.status, QueuedRunStatus::Pending);
    assert_eq!(entry.attempt_count, 1);

    // 失联Worker迟到的结果被拒收
    let late = plane
        .ingestion
        .submit_result(&payload.lease_id, &ResultSubmission::success())
        .await;
    assert!(matches!(late, Err(ConductorError::LeaseExpired { .. })));

    Ok(())
}

#[tokio::test]
async fn test_permanent_failure_parks_candidate() -> Result<()> {
    let plane = control_plane(300).await?;
    let candidate = plane.seed_candidate(0).await?;

    plane.queue_manager.scan_and_enqueue().await?;
    let payload = plane.assign().await?.expect("expected an assignment");

    plane
        .ingestion
        .submit_result(
            &payload.lease_id,
            &ResultSubmission::failure("malformed-change", "patch does not apply"),
        )
        .await?;

    let parked = plane
        .db
        .candidate_repository()
        .get_by_id(candidate.id)
        .await?
        .expect("candidate should exist");
    assert!(parked.stuck);
    assert_eq!(parked.stuck_reason.as_deref(), Some("malformed-change"));

    // 卡住的候选项既不在队列里也不会被重新扫进来
    assert!(plane
        .db
        .queue_repository()
        .get_by_candidate(candidate.id)
        .await?
        .is_none());
    assert_eq!(plane.queue_manager.scan_and_enqueue().await?, 0);

    Ok(())
}

#[tokio::test]
async fn test_unknown_lease_is_rejected() -> Result<()> {
    let plane = control_plane(300).await?;

    let result = plane
        .ingestion
        .submit_result("no-such-lease", &ResultSubmission::success())
        .await;
    assert!(matches!(result, Err(ConductorError::UnknownLease { .. })));

    Ok(())
}
