//! 手动发布触发端点

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::instrument;

use conductor_core::{DeferredReason, PublishOutcome};

use crate::error::ApiResult;
use crate::routes::PublisherState;

/// 对单个候选项立即做一次发布决策
///
/// 推迟用 409/429 区分原因，其余决策结果都以 200 返回，由
/// `result` 字段区分。目标标识含斜杠，须 URL 编码传入。
#[instrument(skip(state))]
pub async fn trigger_publish(
    State(state): State<PublisherState>,
    Path((campaign, target)): Path<(String, String)>,
) -> ApiResult<Response> {
    let outcome = state.publish.consider_publish(&campaign, &target).await?;
    Ok(outcome_response(outcome))
}

fn outcome_response(outcome: PublishOutcome) -> Response {
    match outcome {
        PublishOutcome::Published(proposal) => Json(json!({
            "result": "published",
            "proposal": proposal,
        }))
        .into_response(),
        PublishOutcome::Skipped(reason) => Json(json!({
            "result": "skipped",
            "reason": reason,
        }))
        .into_response(),
        PublishOutcome::Failed { code, description } => Json(json!({
            "result": "failed",
            "code": code,
            "description": description,
        }))
        .into_response(),
        PublishOutcome::Deferred(DeferredReason::RateLimited { bucket }) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "result": "deferred",
                "reason": "rate-limited",
                "bucket": bucket,
            })),
        )
            .into_response(),
        PublishOutcome::Deferred(DeferredReason::LockContended { key }) => (
            StatusCode::CONFLICT,
            Json(json!({
                "result": "deferred",
                "reason": "lock-contended",
                "key": key,
            })),
        )
            .into_response(),
    }
}
