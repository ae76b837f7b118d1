//! 分配与租约生命周期端点
//!
//! Worker 只通过这四个端点和协调器交互：领取、心跳、交结果、
//! （运维侧）吊销。租约竞态在错误层统一映射为 404/410。

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::instrument;

use conductor_core::{AssignRequest, HeartbeatPayload, ResultAccepted, ResultSubmission};

use crate::error::ApiResult;
use crate::routes::RunnerState;

/// 领取下一个运行
///
/// 队列为空或全部被租约排斥时返回 204。
#[instrument(skip(state, request), fields(worker_id = %request.worker_id))]
pub async fn assign(
    State(state): State<RunnerState>,
    Json(request): Json<AssignRequest>,
) -> ApiResult<Response> {
    match state.assignment.assign(&request).await? {
        Some(payload) => Ok(Json(payload).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// 心跳续期租约
#[instrument(skip(state))]
pub async fn heartbeat(
    State(state): State<RunnerState>,
    Path(lease_id): Path<String>,
) -> ApiResult<Json<HeartbeatPayload>> {
    let payload = state.assignment.heartbeat(&lease_id).await?;
    Ok(Json(payload))
}

/// 提交运行结果
#[instrument(skip(state, submission), fields(code = %submission.code))]
pub async fn submit_result(
    State(state): State<RunnerState>,
    Path(lease_id): Path<String>,
    Json(submission): Json<ResultSubmission>,
) -> ApiResult<Json<ResultAccepted>> {
    let accepted = state.ingestion.submit_result(&lease_id, &submission).await?;
    Ok(Json(accepted))
}

/// 吊销租约，运行立即回收重排
#[instrument(skip(state))]
pub async fn revoke_lease(
    State(state): State<RunnerState>,
    Path(lease_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.assignment.revoke(&lease_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
