//! runner 与 publisher HTTP 面的端到端测试
//!
//! 在随机端口起真实 axum 服务，后端接内存实现，用 reqwest
//! 走一遍完整的协议语义与错误映射。

use std::sync::Arc;

use chrono::{Duration, Utc};
use reqwest::StatusCode;
use serde_json::{json, Value};

use conductor_api::{publisher_routes, runner_routes, PublisherState, RunnerState};
use conductor_core::{
    BackoffConfig, Candidate, LockService, ProposalRepository, PublisherConfig, QueueRepository,
    QueuedRun, QueuedRunStatus, RateLimitConfig,
};
use conductor_dispatcher::{AssignmentBroker, ResultIngestion, RetryPolicy};
use conductor_infrastructure::MetricsCollector;
use conductor_publisher::{PublishStateMachine, SlidingWindowRateLimiter};
use conductor_testing_utils::builders::{CandidateBuilder, ProposalBuilder, RunBuilder};
use conductor_testing_utils::mocks::{
    MockCandidateRepository, MockLockService, MockProposalRepository, MockPublishMechanism,
    MockQueueRepository, MockRunRepository,
};

const CAMPAIGN: &str = "lintian-fixes";
const TARGET: &str = "salsa.debian.org/jelmer/dulwich";
const ENCODED_TARGET: &str = "salsa.debian.org%2Fjelmer%2Fdulwich";
const LOCK_KEY: &str = "publish:salsa.debian.org/jelmer/dulwich";

fn test_candidate() -> Candidate {
    CandidateBuilder::new()
        .with_id(1)
        .with_campaign(CAMPAIGN)
        .with_target(TARGET)
        .with_command("fix-all")
        .build()
}

async fn serve(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

struct RunnerFixture {
    base_url: String,
    http: reqwest::Client,
    runs: MockRunRepository,
    queue: MockQueueRepository,
}

impl RunnerFixture {
    async fn assign(&self, worker_id: &str) -> reqwest::Response {
        self.http
            .post(format!("{}/assign", self.base_url))
            .json(&json!({ "worker_id": worker_id }))
            .send()
            .await
            .unwrap()
    }

    async fn assign_payload(&self, worker_id: &str) -> Value {
        let response = self.assign(worker_id).await;
        assert_eq!(response.status(), StatusCode::OK);
        response.json().await.unwrap()
    }
}

async fn spawn_runner(seeded: Vec<Candidate>) -> RunnerFixture {
    let candidates = MockCandidateRepository::with_candidates(seeded);
    let runs = MockRunRepository::new();
    let queue = MockQueueRepository::with_run_repository(runs.clone());
    let metrics = Arc::new(MetricsCollector::new().unwrap());

    let broker = AssignmentBroker::new(
        Arc::new(queue.clone()),
        Arc::new(candidates.clone()),
        metrics.clone(),
        300,
        50,
    );
    let backoff = BackoffConfig {
        base_delay_seconds: 60.0,
        multiplier: 2.0,
        cap_seconds: 3600.0,
        jitter: 0.0,
    };
    let ingestion = ResultIngestion::new(
        Arc::new(queue.clone()),
        Arc::new(runs.clone()),
        Arc::new(candidates.clone()),
        metrics,
        RetryPolicy::new(backoff, 3),
        vec![],
    );

    let state = RunnerState {
        assignment: Arc::new(broker),
        ingestion: Arc::new(ingestion),
        candidate_repo: Arc::new(candidates.clone()),
        run_repo: Arc::new(runs.clone()),
    };
    let base_url = serve(runner_routes(state)).await;

    RunnerFixture {
        base_url,
        http: reqwest::Client::new(),
        runs,
        queue,
    }
}

async fn enqueue(fixture: &RunnerFixture, candidate: &Candidate) {
    fixture.queue.add_candidate(candidate.clone());
    fixture
        .queue
        .enqueue(&QueuedRun::new(candidate, 3))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_assign_returns_no_content_when_queue_empty() {
    let fixture = spawn_runner(vec![]).await;
    let response = fixture.assign("worker-1").await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_assign_then_submit_result_completes_run() {
    let candidate = test_candidate();
    let fixture = spawn_runner(vec![candidate.clone()]).await;
    enqueue(&fixture, &candidate).await;

    let payload = fixture.assign_payload("worker-1").await;
    assert_eq!(payload["candidate"]["campaign"], CAMPAIGN);
    assert_eq!(payload["candidate"]["command"], "fix-all");
    let lease_id = payload["lease_id"].as_str().unwrap().to_string();
    let run_id = payload["run_id"].as_str().unwrap().to_string();

    let response = fixture
        .http
        .post(format!("{}/result/{}", fixture.base_url, lease_id))
        .json(&json!({ "code": "success", "artifacts": { "exit_code": 0 } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let accepted: Value = response.json().await.unwrap();
    assert_eq!(accepted["run_id"], run_id.as_str());

    // 成功结果清队
    assert_eq!(fixture.queue.entry_count(), 0);
}

#[tokio::test]
async fn test_heartbeat_unknown_lease_is_not_found() {
    let fixture = spawn_runner(vec![]).await;
    let response = fixture
        .http
        .post(format!("{}/heartbeat/no-such-lease", fixture.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unknown-lease");
}

#[tokio::test]
async fn test_heartbeat_extends_live_lease() {
    let candidate = test_candidate();
    let fixture = spawn_runner(vec![candidate.clone()]).await;
    enqueue(&fixture, &candidate).await;

    let payload = fixture.assign_payload("worker-1").await;
    let lease_id = payload["lease_id"].as_str().unwrap();

    let response = fixture
        .http
        .post(format!("{}/heartbeat/{lease_id}", fixture.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert!(body["new_expiry"].is_string());
}

#[tokio::test]
async fn test_revoked_lease_rejects_result() {
    let candidate = test_candidate();
    let fixture = spawn_runner(vec![candidate.clone()]).await;
    enqueue(&fixture, &candidate).await;

    let payload = fixture.assign_payload("worker-1").await;
    let lease_id = payload["lease_id"].as_str().unwrap();

    let response = fixture
        .http
        .post(format!("{}/leases/{lease_id}/revoke", fixture.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // 条目立即回到待分配状态
    let entries = fixture.queue.all_entries();
    assert_eq!(entries[0].status, QueuedRunStatus::Pending);

    let response = fixture
        .http
        .post(format!("{}/result/{lease_id}", fixture.base_url))
        .json(&json!({ "code": "success" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "lease-expired");
}

#[tokio::test]
async fn test_get_run_found_and_missing() {
    let candidate = test_candidate();
    let fixture = spawn_runner(vec![candidate.clone()]).await;
    enqueue(&fixture, &candidate).await;

    let payload = fixture.assign_payload("worker-1").await;
    let run_id = payload["run_id"].as_str().unwrap();

    let response = fixture
        .http
        .get(format!("{}/runs/{run_id}", fixture.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"], run_id);
    assert_eq!(body["campaign"], CAMPAIGN);

    let response = fixture
        .http
        .get(format!("{}/runs/does-not-exist", fixture.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "run-not-found");
}

#[tokio::test]
async fn test_list_candidate_runs_with_encoded_target() {
    let candidate = test_candidate();
    let fixture = spawn_runner(vec![candidate.clone()]).await;
    let now = Utc::now();
    fixture.runs.add_run(
        RunBuilder::new()
            .with_id("run-1")
            .with_candidate_id(1)
            .with_campaign(CAMPAIGN)
            .with_target(TARGET)
            .with_started_at(now - Duration::hours(2))
            .successful()
            .build(),
    );
    fixture.runs.add_run(
        RunBuilder::new()
            .with_id("run-2")
            .with_candidate_id(1)
            .with_campaign(CAMPAIGN)
            .with_target(TARGET)
            .with_started_at(now - Duration::hours(1))
            .failed("command-failed")
            .build(),
    );

    let url = format!(
        "{}/candidates/{CAMPAIGN}/{ENCODED_TARGET}/runs",
        fixture.base_url
    );
    let response = fixture.http.get(&url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let runs: Vec<Value> = response.json().await.unwrap();
    assert_eq!(runs.len(), 2);
    // 最新在前
    assert_eq!(runs[0]["id"], "run-2");

    let response = fixture
        .http
        .get(format!("{url}?limit=1"))
        .send()
        .await
        .unwrap();
    let runs: Vec<Value> = response.json().await.unwrap();
    assert_eq!(runs.len(), 1);

    let response = fixture
        .http
        .get(format!(
            "{}/candidates/{CAMPAIGN}/unknown.example%2Fmissing%2Frepo/runs",
            fixture.base_url
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "candidate-not-found");
}

struct PublisherFixture {
    base_url: String,
    http: reqwest::Client,
    runs: MockRunRepository,
    proposals: MockProposalRepository,
    locks: MockLockService,
}

impl PublisherFixture {
    async fn trigger(&self, campaign: &str, encoded_target: &str) -> reqwest::Response {
        self.http
            .post(format!(
                "{}/publish/{campaign}/{encoded_target}",
                self.base_url
            ))
            .send()
            .await
            .unwrap()
    }
}

async fn spawn_publisher(rate: RateLimitConfig) -> PublisherFixture {
    let candidates = MockCandidateRepository::with_candidates(vec![test_candidate()]);
    let runs = MockRunRepository::new();
    let proposals = MockProposalRepository::new();
    let locks = MockLockService::new();
    let mechanism = MockPublishMechanism::new();

    let config = PublisherConfig {
        enabled: true,
        bind_address: "127.0.0.1:0".to_string(),
        publish_gateway_url: "http://127.0.0.1:9914".to_string(),
        scan_interval_seconds: 60,
        batch_size: 50,
        max_publish_attempts: 6,
        proposal_check_interval_seconds: 60,
        proposal_check_batch: 50,
        refresh_priority_boost: 2,
        branch_prefix: "conductor".to_string(),
    };
    let backoff = BackoffConfig {
        base_delay_seconds: 60.0,
        multiplier: 2.0,
        cap_seconds: 3600.0,
        jitter: 0.0,
    };
    let rate_limiter = SlidingWindowRateLimiter::new(Arc::new(proposals.clone()), rate);

    let machine = PublishStateMachine::new(
        Arc::new(candidates),
        Arc::new(runs.clone()),
        Arc::new(proposals.clone()),
        Arc::new(locks.clone()),
        Arc::new(mechanism),
        Arc::new(rate_limiter),
        Arc::new(MetricsCollector::new().unwrap()),
        &config,
        backoff,
        30,
    );

    let state = PublisherState {
        publish: Arc::new(machine),
    };
    let base_url = serve(publisher_routes(state)).await;

    PublisherFixture {
        base_url,
        http: reqwest::Client::new(),
        runs,
        proposals,
        locks,
    }
}

fn open_rate() -> RateLimitConfig {
    RateLimitConfig {
        window_seconds: 3600,
        max_proposals_per_window: 10,
        max_open_proposals: 100,
    }
}

fn seeded_success(fixture: &PublisherFixture) {
    fixture.runs.add_run(
        RunBuilder::new()
            .with_id("run-1")
            .with_candidate_id(1)
            .with_campaign(CAMPAIGN)
            .with_target(TARGET)
            .successful()
            .build(),
    );
}

#[tokio::test]
async fn test_trigger_publish_creates_proposal() {
    let fixture = spawn_publisher(open_rate()).await;
    seeded_success(&fixture);

    let response = fixture.trigger(CAMPAIGN, ENCODED_TARGET).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"], "published");
    assert!(body["proposal"]["url"]
        .as_str()
        .unwrap()
        .starts_with("https://"));
    assert_eq!(fixture.proposals.count(), 1);
}

#[tokio::test]
async fn test_trigger_publish_without_success_is_skipped() {
    let fixture = spawn_publisher(open_rate()).await;

    let response = fixture.trigger(CAMPAIGN, ENCODED_TARGET).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"], "skipped");
    assert_eq!(fixture.proposals.count(), 0);
}

#[tokio::test]
async fn test_trigger_publish_unknown_candidate_is_not_found() {
    let fixture = spawn_publisher(open_rate()).await;

    let response = fixture
        .trigger(CAMPAIGN, "unknown.example%2Fmissing%2Frepo")
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "candidate-not-found");
}

#[tokio::test]
async fn test_trigger_publish_rate_limited_is_too_many_requests() {
    let fixture = spawn_publisher(RateLimitConfig {
        window_seconds: 3600,
        max_proposals_per_window: 1,
        max_open_proposals: 100,
    })
    .await;
    seeded_success(&fixture);

    // 同host窗口预算已被其他campaign用掉
    fixture
        .proposals
        .create(
            &ProposalBuilder::new()
                .with_candidate_id(9)
                .with_campaign("fresh-releases")
                .with_target("salsa.debian.org/other/repo")
                .with_run_id("run-other")
                .build(),
        )
        .await
        .unwrap();

    let response = fixture.trigger(CAMPAIGN, ENCODED_TARGET).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"], "deferred");
    assert_eq!(body["reason"], "rate-limited");
}

#[tokio::test]
async fn test_trigger_publish_lock_contended_is_conflict() {
    let fixture = spawn_publisher(open_rate()).await;
    seeded_success(&fixture);

    let held = fixture.locks.acquire(LOCK_KEY, 60).await.unwrap();

    let response = fixture.trigger(CAMPAIGN, ENCODED_TARGET).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reason"], "lock-contended");

    fixture.locks.release(&held).await.unwrap();
    assert_eq!(fixture.proposals.count(), 0);
}

#[tokio::test]
async fn test_health_endpoints_respond() {
    let runner = spawn_runner(vec![]).await;
    let response = runner
        .http
        .get(format!("{}/health", runner.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
}
