use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::services::error::PipelineError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Pipeline failed: {0}")]
    Pipeline(#[from] PipelineError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BadRequest", msg),
            AppError::Pipeline(e @ PipelineError::InvalidEvent(_)) => {
                (StatusCode::BAD_REQUEST, e.kind(), e.to_string())
            }
            // Notifiers redeliver on 5xx; only ask for that when it can help.
            AppError::Pipeline(e) if e.is_retryable() => {
                tracing::warn!("Retryable pipeline failure: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, e.kind(), e.to_string())
            }
            AppError::Pipeline(e) => {
                tracing::warn!("Permanent pipeline failure: {}", e);
                (StatusCode::UNPROCESSABLE_ENTITY, e.kind(), e.to_string())
            }
        };

        let body = Json(json!({
            "status": "failed",
            "kind": kind,
            "error": message
        }));

        (status, body).into_response()
    }
}
