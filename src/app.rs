use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use conductor_api::{publisher_routes, runner_routes, PublisherState, RunnerState};
use conductor_core::AppConfig;
use conductor_dispatcher::{
    AssignmentBroker, DispatcherController, LeaseReclaimer, QueueManager, ResultIngestion,
    RetryPolicy,
};
use conductor_infrastructure::{
    lock_service_from_config, mask_url, DatabaseManager, HttpPublishMechanism, MetricsCollector,
};
use conductor_publisher::{
    ProposalMonitor, PublishStateMachine, PublisherController, SlidingWindowRateLimiter,
};
use conductor_worker::{ShellExecutor, WorkerService};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// 应用运行模式
///
/// 五个可独立部署的守护进程加本机worker，`All` 把配置里启用的
/// 组件放进同一个进程，单机部署和端到端测试用。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 调度面：候选扫描、分配、结果摄取、租约回收 + Worker协议HTTP面
    Runner,
    /// 发布面：发布状态机、提案监视 + 手动发布HTTP面
    Publisher,
    /// 本机Worker执行循环
    Worker,
    /// 制品归档服务（静态托管，签名与索引由外部流水线维护）
    Archive,
    /// VCS仓库服务（裸仓库静态托管）
    VcsStore,
    /// 制品差异服务
    Differ,
    /// 运行所有启用的组件
    All,
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    /// 调度/发布面才需要存储；归档等薄服务不连库
    db: Option<Arc<DatabaseManager>>,
    metrics: Arc<MetricsCollector>,
}

impl Application {
    /// 创建新的应用实例
    ///
    /// 存储不可达属于启动期致命错误，直接向上返回让进程以
    /// 非零码退出。
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        let db = if mode_needs_store(mode, &config) {
            info!("连接存储: {}", mask_url(&config.store.url));
            let manager = DatabaseManager::new(&config.store)
                .await
                .context("连接存储失败")?;
            Some(Arc::new(manager))
        } else {
            None
        };

        let metrics = Arc::new(MetricsCollector::new().context("创建指标收集器失败")?);

        Ok(Self {
            config,
            mode,
            db,
            metrics,
        })
    }

    /// 运行应用程序直到收到关闭信号
    ///
    /// 返回装箱future：`All` 模式会递归调用 `run`，异步递归需要
    /// 装箱来打破opaque类型的自引用。
    pub fn run<'a>(
        &'a self,
        shutdown: &'a broadcast::Sender<()>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            info!("启动应用程序，模式: {:?}", self.mode);

            match self.mode {
                AppMode::Runner => self.run_runner(shutdown).await?,
                AppMode::Publisher => self.run_publisher(shutdown).await?,
                AppMode::Worker => self.run_worker(shutdown).await?,
                AppMode::Archive => self.run_archive(shutdown).await?,
                AppMode::VcsStore => self.run_vcs_store(shutdown).await?,
                AppMode::Differ => self.run_differ(shutdown).await?,
                AppMode::All => self.run_all_components(shutdown).await?,
            }

            Ok(())
        })
    }

    fn store(&self) -> Result<&Arc<DatabaseManager>> {
        self.db
            .as_ref()
            .context("当前模式未初始化存储连接")
    }

    /// 运行调度面（runner）
    async fn run_runner(&self, shutdown: &broadcast::Sender<()>) -> Result<()> {
        let runner = &self.config.runner;
        info!("启动runner服务: {}", runner.bind_address);

        let db = self.store()?;
        let candidate_repo = db.candidate_repository();
        let queue_repo = db.queue_repository();
        let run_repo = db.run_repository();

        let retry_policy = RetryPolicy::new(self.config.backoff.clone(), runner.max_run_attempts);

        let queue_manager = Arc::new(QueueManager::new(
            candidate_repo.clone(),
            queue_repo.clone(),
            Arc::clone(&self.metrics),
            runner.assign_batch_size,
        ));
        let reclaimer = Arc::new(LeaseReclaimer::new(
            queue_repo.clone(),
            candidate_repo.clone(),
            Arc::clone(&self.metrics),
            retry_policy.clone(),
            runner.assign_batch_size,
        ));
        let controller = DispatcherController::new(
            queue_manager,
            reclaimer,
            runner.candidate_scan_interval_seconds,
            runner.reclaim_interval_seconds,
        );

        let broker = Arc::new(AssignmentBroker::new(
            queue_repo.clone(),
            candidate_repo.clone(),
            Arc::clone(&self.metrics),
            runner.lease_ttl_seconds,
            runner.assign_batch_size,
        ));
        let ingestion = Arc::new(ResultIngestion::new(
            queue_repo,
            run_repo.clone(),
            candidate_repo.clone(),
            Arc::clone(&self.metrics),
            retry_policy,
            runner.extra_transient_codes.clone(),
        ));

        let router = runner_routes(RunnerState {
            assignment: broker,
            ingestion,
            candidate_repo,
            run_repo,
        });

        let (_, served) = tokio::join!(
            controller.run(shutdown),
            serve_http(router, &runner.bind_address, shutdown.subscribe()),
        );
        served?;

        info!("runner服务已停止");
        Ok(())
    }

    /// 运行发布面（publisher）
    async fn run_publisher(&self, shutdown: &broadcast::Sender<()>) -> Result<()> {
        let publisher = &self.config.publisher;
        info!("启动publisher服务: {}", publisher.bind_address);

        let db = self.store()?;
        let candidate_repo = db.candidate_repository();
        let queue_repo = db.queue_repository();
        let run_repo = db.run_repository();
        let proposal_repo = db.proposal_repository();

        info!("连接锁服务: {}", mask_url(&self.config.lock.url));
        let lock_service = lock_service_from_config(&self.config.lock)
            .await
            .context("连接锁服务失败")?;

        let mechanism = Arc::new(HttpPublishMechanism::new(&publisher.publish_gateway_url));
        let rate_limiter = Arc::new(SlidingWindowRateLimiter::new(
            proposal_repo.clone(),
            self.config.rate_limit.clone(),
        ));

        let state_machine = Arc::new(PublishStateMachine::new(
            candidate_repo.clone(),
            run_repo,
            proposal_repo.clone(),
            lock_service,
            mechanism.clone(),
            rate_limiter,
            Arc::clone(&self.metrics),
            publisher,
            self.config.backoff.clone(),
            self.config.lock.ttl_seconds,
        ));
        let monitor = Arc::new(ProposalMonitor::new(
            proposal_repo,
            candidate_repo,
            queue_repo,
            mechanism,
            Arc::clone(&self.metrics),
            publisher,
        ));
        let controller = PublisherController::new(
            Arc::clone(&state_machine),
            monitor,
            publisher.scan_interval_seconds,
            publisher.proposal_check_interval_seconds,
        );

        let router = publisher_routes(PublisherState {
            publish: state_machine,
        });

        let (_, served) = tokio::join!(
            controller.run(shutdown),
            serve_http(router, &publisher.bind_address, shutdown.subscribe()),
        );
        served?;

        info!("publisher服务已停止");
        Ok(())
    }

    /// 运行本机Worker
    async fn run_worker(&self, shutdown: &broadcast::Sender<()>) -> Result<()> {
        let worker = &self.config.worker;
        info!("启动worker服务: runner={}", worker.runner_url);

        let executor = Arc::new(ShellExecutor::new(worker.command_timeout_seconds));
        let service = WorkerService::new(worker, executor);
        service.run(shutdown).await;

        info!("worker服务已停止");
        Ok(())
    }

    /// 运行制品归档服务
    ///
    /// 运行制品的静态托管面；归档索引的签名与重建由外部流水线
    /// 负责，这里只托管目录。
    async fn run_archive(&self, shutdown: &broadcast::Sender<()>) -> Result<()> {
        let archive = &self.config.archive;
        info!(
            "启动archive服务: {} 根目录={}",
            archive.bind_address, archive.root_dir
        );

        let router = Router::new()
            .route("/health", get(thin_health))
            .fallback_service(ServeDir::new(&archive.root_dir))
            .layer(TraceLayer::new_for_http());

        serve_http(router, &archive.bind_address, shutdown.subscribe()).await?;

        info!("archive服务已停止");
        Ok(())
    }

    /// 运行VCS仓库服务
    ///
    /// 裸仓库目录的只读托管；推送走发布网关，不经过这里。
    async fn run_vcs_store(&self, shutdown: &broadcast::Sender<()>) -> Result<()> {
        let vcs = &self.config.vcs_store;
        info!(
            "启动vcs-store服务: {} 根目录={}",
            vcs.bind_address, vcs.root_dir
        );

        let router = Router::new()
            .route("/health", get(thin_health))
            .fallback_service(ServeDir::new(&vcs.root_dir))
            .layer(TraceLayer::new_for_http());

        serve_http(router, &vcs.bind_address, shutdown.subscribe()).await?;

        info!("vcs-store服务已停止");
        Ok(())
    }

    /// 运行制品差异服务
    ///
    /// 差异计算由外部协作方实现，这里只提供健康探针占位的
    /// 服务面，保持五个守护进程的部署形态一致。
    async fn run_differ(&self, shutdown: &broadcast::Sender<()>) -> Result<()> {
        let differ = &self.config.differ;
        info!("启动differ服务: {}", differ.bind_address);

        let router = Router::new()
            .route("/health", get(thin_health))
            .layer(TraceLayer::new_for_http());

        serve_http(router, &differ.bind_address, shutdown.subscribe()).await?;

        info!("differ服务已停止");
        Ok(())
    }

    /// 运行所有启用的组件
    async fn run_all_components(&self, shutdown: &broadcast::Sender<()>) -> Result<()> {
        info!("启动所有启用的组件");

        let mut handles = Vec::new();
        let modes = [
            (self.config.runner.enabled, AppMode::Runner),
            (self.config.publisher.enabled, AppMode::Publisher),
            (self.config.worker.enabled, AppMode::Worker),
            (self.config.archive.enabled, AppMode::Archive),
            (self.config.vcs_store.enabled, AppMode::VcsStore),
            (self.config.differ.enabled, AppMode::Differ),
        ];

        for (enabled, mode) in modes {
            if !enabled {
                continue;
            }
            let app = self.clone_for_mode(mode);
            let shutdown = shutdown.clone();

            handles.push(tokio::spawn(async move {
                if let Err(e) = app.run(&shutdown).await {
                    error!("{:?} 组件运行失败: {e:#}", mode);
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        info!("所有组件已停止");
        Ok(())
    }

    /// 为特定模式克隆应用实例
    fn clone_for_mode(&self, mode: AppMode) -> Self {
        Self {
            config: self.config.clone(),
            mode,
            db: self.db.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// 模式是否需要持久存储
fn mode_needs_store(mode: AppMode, config: &AppConfig) -> bool {
    match mode {
        AppMode::Runner | AppMode::Publisher => true,
        AppMode::Worker | AppMode::Archive | AppMode::VcsStore | AppMode::Differ => false,
        AppMode::All => config.runner.enabled || config.publisher.enabled,
    }
}

/// 薄服务的健康探针
async fn thin_health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// 绑定监听地址并带优雅关闭地运行HTTP服务
async fn serve_http(
    router: Router,
    bind_address: &str,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("绑定地址失败: {bind_address}"))?;

    info!("HTTP服务启动在 http://{bind_address}");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .context("HTTP服务运行失败")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_needs_store() {
        let config = AppConfig::default();
        assert!(mode_needs_store(AppMode::Runner, &config));
        assert!(mode_needs_store(AppMode::Publisher, &config));
        assert!(!mode_needs_store(AppMode::Worker, &config));
        assert!(!mode_needs_store(AppMode::Differ, &config));
        // all模式跟随启用的组件
        assert!(mode_needs_store(AppMode::All, &config));

        let mut thin = config.clone();
        thin.runner.enabled = false;
        thin.publisher.enabled = false;
        assert!(!mode_needs_store(AppMode::All, &thin));
    }
}
