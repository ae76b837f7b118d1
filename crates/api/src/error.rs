//! HTTP错误映射
//!
//! 领域错误按协议语义映射到状态码：租约竞态是404/410，发布
//! 协调信号是409/429，其余基础设施故障一律500。响应体里的
//! `code` 是稳定的机器可读标识，message 仅供人读。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use conductor_core::ConductorError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Conductor(#[from] ConductorError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Conductor(e) => match e {
                ConductorError::UnknownLease { .. } => (StatusCode::NOT_FOUND, "unknown-lease"),
                ConductorError::LeaseExpired { .. } => (StatusCode::GONE, "lease-expired"),
                ConductorError::CandidateNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "candidate-not-found")
                }
                ConductorError::RunNotFound { .. } => (StatusCode::NOT_FOUND, "run-not-found"),
                ConductorError::QueuedRunNotFound { .. }
                | ConductorError::ProposalNotFound { .. } => (StatusCode::NOT_FOUND, "not-found"),
                ConductorError::LockContended { .. } => (StatusCode::CONFLICT, "lock-contended"),
                ConductorError::InvalidParams(_) => (StatusCode::BAD_REQUEST, "invalid-params"),
                ConductorError::Publish { .. } => (StatusCode::BAD_GATEWAY, "publish-failed"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal-error"),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad-request"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
                "status": status.as_u16(),
            }
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
