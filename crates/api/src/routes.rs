//! 路由表与共享状态
//!
//! runner 与 publisher 是两个独立部署的 HTTP 面，各自挂一棵
//! 路由树。状态里的服务全部以 trait 对象注入，测试时可换成
//! 内存实现。

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use conductor_core::{
    AssignmentService, CandidateRepository, PublishService, ResultIngestionService, RunRepository,
};

use crate::handlers;

/// runner HTTP面的共享状态
#[derive(Clone)]
pub struct RunnerState {
    pub assignment: Arc<dyn AssignmentService>,
    pub ingestion: Arc<dyn ResultIngestionService>,
    pub candidate_repo: Arc<dyn CandidateRepository>,
    pub run_repo: Arc<dyn RunRepository>,
}

/// publisher HTTP面的共享状态
#[derive(Clone)]
pub struct PublisherState {
    pub publish: Arc<dyn PublishService>,
}

/// 构建 runner 路由树
///
/// 目标标识含斜杠，路径段中须经 URL 编码传入。
pub fn runner_routes(state: RunnerState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/assign", post(handlers::assignment::assign))
        .route(
            "/heartbeat/{lease_id}",
            post(handlers::assignment::heartbeat),
        )
        .route(
            "/result/{lease_id}",
            post(handlers::assignment::submit_result),
        )
        .route(
            "/leases/{lease_id}/revoke",
            post(handlers::assignment::revoke_lease),
        )
        .route("/runs/{run_id}", get(handlers::runs::get_run))
        .route(
            "/candidates/{campaign}/{target}/runs",
            get(handlers::runs::list_candidate_runs),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// 构建 publisher 路由树
pub fn publisher_routes(state: PublisherState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/publish/{campaign}/{target}",
            post(handlers::publish::trigger_publish),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
