//! 调度后台循环编排
//!
//! 两个周期任务：候选项扫描入队、过期租约回收。各自订阅关闭
//! 广播，收到信号后在本轮处理结束时退出。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::queue_manager::QueueManager;
use crate::reclaimer::LeaseReclaimer;

pub struct DispatcherController {
    pub queue_manager: Arc<QueueManager>,
    pub reclaimer: Arc<LeaseReclaimer>,
    scan_interval_seconds: u64,
    reclaim_interval_seconds: u64,
}

impl DispatcherController {
    pub fn new(
        queue_manager: Arc<QueueManager>,
        reclaimer: Arc<LeaseReclaimer>,
        scan_interval_seconds: u64,
        reclaim_interval_seconds: u64,
    ) -> Self {
        Self {
            queue_manager,
            reclaimer,
            scan_interval_seconds,
            reclaim_interval_seconds,
        }
    }

    /// 启动全部后台循环并等待它们退出
    pub async fn run(&self, shutdown: &broadcast::Sender<()>) {
        info!(
            "调度后台循环启动: 扫描间隔={}s 回收间隔={}s",
            self.scan_interval_seconds, self.reclaim_interval_seconds
        );

        let scan_handle = tokio::spawn(run_scan_loop(
            self.queue_manager.clone(),
            self.scan_interval_seconds,
            shutdown.subscribe(),
        ));
        let reclaim_handle = tokio::spawn(run_reclaim_loop(
            self.reclaimer.clone(),
            self.reclaim_interval_seconds,
            shutdown.subscribe(),
        ));

        let _ = tokio::join!(scan_handle, reclaim_handle);
        info!("调度后台循环已全部退出");
    }
}

/// 候选项扫描循环
pub async fn run_scan_loop(
    queue_manager: Arc<QueueManager>,
    interval_seconds: u64,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = queue_manager.scan_and_enqueue().await {
                    error!("候选项扫描失败: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                info!("候选项扫描循环收到关闭信号");
                break;
            }
        }
    }
}

/// 过期租约回收循环
pub async fn run_reclaim_loop(
    reclaimer: Arc<LeaseReclaimer>,
    interval_seconds: u64,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = reclaimer.reclaim_once(Utc::now()).await {
                    error!("租约回收扫描失败: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                info!("租约回收循环收到关闭信号");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::config::BackoffConfig;
    use conductor_infrastructure::MetricsCollector;
    use conductor_testing_utils::builders::CandidateBuilder;
    use conductor_testing_utils::mocks::{MockCandidateRepository, MockQueueRepository};

    use crate::retry_service::RetryPolicy;

    fn controller(
        candidates: MockCandidateRepository,
        queue: MockQueueRepository,
    ) -> DispatcherController {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let queue_repo: Arc<MockQueueRepository> = Arc::new(queue);
        let queue_manager = Arc::new(QueueManager::new(
            Arc::new(candidates.clone()),
            queue_repo.clone(),
            metrics.clone(),
            50,
        ));
        let backoff = BackoffConfig {
            base_delay_seconds: 60.0,
            multiplier: 2.0,
            cap_seconds: 3600.0,
            jitter: 0.0,
        };
        let reclaimer = Arc::new(LeaseReclaimer::new(
            queue_repo,
            Arc::new(candidates),
            metrics,
            RetryPolicy::new(backoff, 10),
            100,
        ));
        DispatcherController::new(queue_manager, reclaimer, 1, 1)
    }

    #[tokio::test]
    async fn test_controller_stops_on_shutdown_signal() {
        let controller = Arc::new(controller(
            MockCandidateRepository::new(),
            MockQueueRepository::new(),
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
    async fn test_scan_loop_enqueues_candidates() {
        let candidates = MockCandidateRepository::with_candidates(vec![CandidateBuilder::new()
            .with_id(1)
            .build()]);
        let queue = MockQueueRepository::new();
        let controller = Arc::new(controller(candidates, queue.clone()));
        let (shutdown_tx, _) = broadcast::channel(1);

        let handle = tokio::spawn({
            let controller = controller.clone();
            let shutdown = shutdown_tx.clone();
            async move { controller.run(&shutdown).await }
        });

        // 第一次tick立即触发，稍候即可看到入队结果
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(queue.entry_count(), 1);

        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("controller did not stop after shutdown signal")
            .unwrap();
    }
}
