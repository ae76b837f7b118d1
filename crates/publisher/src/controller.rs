//! 发布后台循环编排
//!
//! 两个周期任务：就绪运行的发布扫描、开放提案的状态核对。各自
//! 订阅关闭广播，收到信号后在本轮处理结束时退出。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{error, info};

use conductor_core::traits::PublishService;

use crate::proposal_monitor::ProposalMonitor;
use crate::state_machine::PublishStateMachine;

pub struct PublisherController {
    pub state_machine: Arc<PublishStateMachine>,
    pub monitor: Arc<ProposalMonitor>,
    scan_interval_seconds: u64,
    check_interval_seconds: u64,
}

impl PublisherController {
    pub fn new(
        state_machine: Arc<PublishStateMachine>,
        monitor: Arc<ProposalMonitor>,
        scan_interval_seconds: u64,
        check_interval_seconds: u64,
    ) -> Self {
        Self {
            state_machine,
            monitor,
            scan_interval_seconds,
            check_interval_seconds,
        }
    }

    /// 启动全部后台循环并等待它们退出
    pub async fn run(&self, shutdown: &broadcast::Sender<()>) {
        info!(
            "发布后台循环启动: 扫描间隔={}s 核对间隔={}s",
            self.scan_interval_seconds, self.check_interval_seconds
        );

        let publish_handle = tokio::spawn(run_publish_loop(
            self.state_machine.clone(),
            self.scan_interval_seconds,
            shutdown.subscribe(),
        ));
        let monitor_handle = tokio::spawn(run_monitor_loop(
            self.monitor.clone(),
            self.check_interval_seconds,
            shutdown.subscribe(),
        ));

        let _ = tokio::join!(publish_handle, monitor_handle);
        info!("发布后台循环已全部退出");
    }
}

/// 就绪运行发布循环
pub async fn run_publish_loop(
    state_machine: Arc<PublishStateMachine>,
    interval_seconds: u64,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = state_machine.scan_and_publish().await {
                    error!("发布扫描失败: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                info!("发布扫描循环收到关闭信号");
                break;
            }
        }
    }
}

/// 提案状态核对循环
pub async fn run_monitor_loop(
    monitor: Arc<ProposalMonitor>,
    interval_seconds: u64,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = monitor.check_once(Utc::now()).await {
                    error!("提案状态核对失败: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                info!("提案核对循环收到关闭信号");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::config::{BackoffConfig, PublisherConfig, RateLimitConfig};
    use conductor_core::traits::PublishableRun;
    use conductor_infrastructure::MetricsCollector;
    use conductor_testing_utils::builders::{CandidateBuilder, RunBuilder};
    use conductor_testing_utils::mocks::{
        MockCandidateRepository, MockLockService, MockProposalRepository, MockPublishMechanism,
        MockQueueRepository, MockRunRepository,
    };

    use crate::rate_limiter::SlidingWindowRateLimiter;

    fn controller(
        candidates: MockCandidateRepository,
        runs: MockRunRepository,
        proposals: MockProposalRepository,
    ) -> PublisherController {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let config = PublisherConfig {
            enabled: true,
            bind_address: "127.0.0.1:0".to_string(),
            publish_gateway_url: "http://127.0.0.1:9914".to_string(),
            scan_interval_seconds: 1,
            batch_size: 50,
            max_publish_attempts: 6,
            proposal_check_interval_seconds: 1,
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
        let rate = RateLimitConfig {
            window_seconds: 3600,
            max_proposals_per_window: 100,
            max_open_proposals: 100,
        };
        let mechanism: Arc<MockPublishMechanism> = Arc::new(MockPublishMechanism::new());

        let state_machine = Arc::new(PublishStateMachine::new(
            Arc::new(candidates.clone()),
            Arc::new(runs),
            Arc::new(proposals.clone()),
            Arc::new(MockLockService::new()),
            mechanism.clone(),
            Arc::new(SlidingWindowRateLimiter::new(
                Arc::new(proposals.clone()),
                rate,
            )),
            metrics.clone(),
            &config,
            backoff,
            30,
        ));
        let monitor = Arc::new(ProposalMonitor::new(
            Arc::new(proposals),
            Arc::new(candidates),
            Arc::new(MockQueueRepository::new()),
            mechanism,
            metrics,
            &config,
        ));
        PublisherController::new(state_machine, monitor, 1, 1)
    }

    #[tokio::test]
    async fn test_controller_stops_on_shutdown_signal() {
        let controller = Arc::new(controller(
            MockCandidateRepository::new(),
            MockRunRepository::new(),
            MockProposalRepository::new(),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        let handle = tokio::spawn({
            let controller = controller.clone();
            let shutdown = shutdown_tx.clone();
            async move { controller.run(&shutdown).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("controller did not stop after shutdown signal")
            .unwrap();
    }

    #[tokio::test]
    async fn test_publish_loop_publishes_ready_runs() {
        let candidate = CandidateBuilder::new()
            .with_id(1)
            .with_campaign("lintian-fixes")
            .with_target("salsa.debian.org/jelmer/dulwich")
            .build();
        let run = RunBuilder::new()
            .with_id("run-1")
            .with_candidate_id(1)
            .with_campaign("lintian-fixes")
            .with_target("salsa.debian.org/jelmer/dulwich")
            .successful()
            .build();

        let candidates = MockCandidateRepository::with_candidates(vec![candidate.clone()]);
        let runs = MockRunRepository::new();
        runs.add_run(run.clone());
        runs.push_publishable(PublishableRun { candidate, run });
        let proposals = MockProposalRepository::new();

        let controller = Arc::new(controller(candidates, runs, proposals.clone()));
        let (shutdown_tx, _) = broadcast::channel(1);

        let handle = tokio::spawn({
            let controller = controller.clone();
            let shutdown = shutdown_tx.clone();
            async move { controller.run(&shutdown).await }
        });

        // 第一次tick立即触发，稍候即可看到发布结果
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(proposals.count(), 1);

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("controller did not stop after shutdown signal")
            .unwrap();
    }
}
