//! 运行查询端点

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use tracing::instrument;

use conductor_core::{ConductorError, Run};

use crate::error::ApiResult;
use crate::routes::RunnerState;

#[derive(Debug, Deserialize)]
pub struct RunListParams {
    pub limit: Option<i64>,
}

/// 查询单个运行
#[instrument(skip(state))]
pub async fn get_run(
    State(state): State<RunnerState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<Run>> {
    let run = state
        .run_repo
        .get_by_id(&run_id)
        .await?
        .ok_or(ConductorError::RunNotFound { id: run_id })?;
    Ok(Json(run))
}

/// 列出候选项的运行历史，最新在前
///
/// 目标标识含斜杠，调用方须对 target 路径段做 URL 编码。
#[instrument(skip(state, params))]
pub async fn list_candidate_runs(
    State(state): State<RunnerState>,
    Path((campaign, target)): Path<(String, String)>,
    Query(params): Query<RunListParams>,
) -> ApiResult<Json<Vec<Run>>> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let candidate = state
        .candidate_repo
        .get_by_key(&campaign, &target)
        .await?
        .ok_or(ConductorError::CandidateNotFound { campaign, target })?;
    let runs = state.run_repo.list_for_candidate(candidate.id, limit).await?;
    Ok(Json(runs))
}
