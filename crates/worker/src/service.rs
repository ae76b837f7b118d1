//! Worker拉取循环
//!
//! 向运行器领取分配，在心跳保护下执行，上报终态结果。队列为空
//! 时按拉取间隔等待，收到关闭信号后在当前运行结束并上报后退出。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use conductor_core::config::WorkerConfig;
use conductor_core::models::AssignmentPayload;
use conductor_core::ConductorResult;

use crate::client::CoordinatorClient;
use crate::executor::RunExecutor;
use crate::heartbeat::start_heartbeat;

pub struct WorkerService {
    pub client: Arc<CoordinatorClient>,
    pub executor: Arc<dyn RunExecutor>,
    capabilities: Vec<String>,
    poll_interval_seconds: u64,
    heartbeat_interval_seconds: u64,
}

impl WorkerService {
    pub fn new(config: &WorkerConfig, executor: Arc<dyn RunExecutor>) -> Self {
        let worker_id = resolve_worker_id(config);
        Self {
            client: Arc::new(CoordinatorClient::new(&config.runner_url, &worker_id)),
            executor,
            capabilities: config.capabilities.clone(),
            poll_interval_seconds: config.poll_interval_seconds,
            heartbeat_interval_seconds: config.heartbeat_interval_seconds,
        }
    }

    /// 运行拉取循环直到收到关闭信号
    pub async fn run(&self, shutdown: &broadcast::Sender<()>) {
        let mut shutdown_rx = shutdown.subscribe();
        let mut poll = tokio::time::interval(Duration::from_secs(self.poll_interval_seconds));
        info!(
            "Worker启动: id={} 拉取间隔={}s",
            self.client.worker_id(),
            self.poll_interval_seconds
        );

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    match self.poll_once().await {
                        Ok(_) => {}
                        Err(e) => error!("拉取循环出错: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Worker收到关闭信号");
                    break;
                }
            }
        }
    }

    /// 领取并处理一次分配；队列为空时返回 `false`
    pub async fn poll_once(&self) -> ConductorResult<bool> {
        let Some(assignment) = self.client.request_assignment(&self.capabilities).await? else {
            return Ok(false);
        };
        self.process_assignment(assignment).await?;
        Ok(true)
    }

    async fn process_assignment(&self, assignment: AssignmentPayload) -> ConductorResult<()> {
        info!(
            "收到分配: run={} {}/{} 尝试={}",
            assignment.run_id,
            assignment.candidate.campaign,
            assignment.candidate.target,
            assignment.candidate.attempt
        );

        let heartbeat = start_heartbeat(
            self.client.clone(),
            assignment.lease_id.clone(),
            self.heartbeat_interval_seconds,
        );
        let submission = self.executor.execute(&assignment).await;
        heartbeat.stop().await;

        match self
            .client
            .submit_result(&assignment.lease_id, &submission)
            .await
        {
            Ok(accepted) => {
                info!("结果已提交: run={} code={}", accepted.run_id, submission.code);
                Ok(())
            }
            Err(e) if e.is_lease_race() => {
                // 租约在执行期间被回收，条目会被重新调度，结果直接作废
                warn!("结果被拒收: run={}: {}", assignment.run_id, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// 配置的 worker_id 为 "auto" 时取主机名
fn resolve_worker_id(config: &WorkerConfig) -> String {
    if config.worker_id != "auto" {
        return config.worker_id.clone();
    }
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "worker-auto".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    use conductor_core::models::ResultSubmission;

    use crate::executor::ShellExecutor;

    #[derive(Clone, Default)]
    struct StubState {
        assigned: Arc<Mutex<bool>>,
        results: Arc<Mutex<Vec<ResultSubmission>>>,
        reject_results: bool,
    }

    fn stub_router(state: StubState) -> Router {
        Router::new()
            .route(
                "/assign",
                post(|State(state): State<StubState>| async move {
                    let mut assigned = state.assigned.lock().unwrap();
                    if *assigned {
                        return StatusCode::NO_CONTENT.into_response();
                    }
                    *assigned = true;
                    Json(json!({
                        "run_id": "run-17",
                        "lease_id": "lease-9",
                        "candidate": {
                            "campaign": "lintian-fixes",
                            "target": "salsa.debian.org/jelmer/dulwich",
                            "command": "echo done",
                            "refresh": false,
                            "attempt": 0
                        },
                        "expiry": "2026-01-01T00:05:00Z"
                    }))
                    .into_response()
                }),
            )
            .route(
                "/heartbeat/{lease_id}",
                post(|| async { Json(json!({"new_expiry": "2026-01-01T00:10:00Z"})) }),
            )
            .route(
                "/result/{lease_id}",
                post(
                    |State(state): State<StubState>,
                     Json(submission): Json<ResultSubmission>| async move {
                        state.results.lock().unwrap().push(submission);
                        if state.reject_results {
                            StatusCode::GONE.into_response()
                        } else {
                            Json(json!({"run_id": "run-17"})).into_response()
                        }
                    },
                ),
            )
            .with_state(state)
    }

    async fn spawn_stub(state: StubState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = stub_router(state);
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn worker_config(runner_url: &str) -> WorkerConfig {
        WorkerConfig {
            enabled: true,
            worker_id: "worker-test".to_string(),
            runner_url: runner_url.to_string(),
            capabilities: vec!["debian".to_string()],
            poll_interval_seconds: 1,
            heartbeat_interval_seconds: 3600,
            command_timeout_seconds: 30,
        }
    }

    #[tokio::test]
    async fn test_poll_executes_assignment_and_submits_result() {
        let state = StubState::default();
        let base = spawn_stub(state.clone()).await;
        let service = WorkerService::new(&worker_config(&base), Arc::new(ShellExecutor::new(30)));

        let handled = service.poll_once().await.unwrap();
        assert!(handled);

        let results = state.results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].code, "success");
        assert_eq!(
            results[0].artifacts.as_ref().unwrap()["stdout_tail"][0],
            "done"
        );
    }

    #[tokio::test]
    async fn test_empty_queue_polls_false() {
        let state = StubState::default();
        *state.assigned.lock().unwrap() = true;
        let base = spawn_stub(state).await;
        let service = WorkerService::new(&worker_config(&base), Arc::new(ShellExecutor::new(30)));

        let handled = service.poll_once().await.unwrap();
        assert!(!handled);
    }

    #[tokio::test]
    async fn test_rejected_result_is_not_an_error() {
        let state = StubState {
            reject_results: true,
            ..StubState::default()
        };
        let base = spawn_stub(state.clone()).await;
        let service = WorkerService::new(&worker_config(&base), Arc::new(ShellExecutor::new(30)));

        // 租约在执行中途被回收，结果被410拒收，循环照常继续
        let handled = service.poll_once().await.unwrap();
        assert!(handled);
        assert_eq!(state.results.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_shutdown_signal() {
        let state = StubState::default();
        *state.assigned.lock().unwrap() = true;
        let base = spawn_stub(state).await;
        let service = Arc::new(WorkerService::new(
            &worker_config(&base),
            Arc::new(ShellExecutor::new(30)),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        let handle = tokio::spawn({
            let service = service.clone();
            let shutdown = shutdown_tx.clone();
            async move { service.run(&shutdown).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker did not stop after shutdown signal")
            .unwrap();
    }
}
