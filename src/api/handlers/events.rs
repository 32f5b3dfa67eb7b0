use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::AppState;
use crate::api::error::AppError;
use crate::models::{BucketNotification, Outcome};

#[derive(Debug, Serialize, ToSchema)]
pub struct EventResponse {
    /// "uploaded" or "skipped"
    pub status: String,
    pub bucket: Option<String>,
    pub key: Option<String>,
    pub size: Option<u64>,
    pub checksum: Option<String>,
    pub reason: Option<String>,
}

/// Bucket notification webhook.
///
/// Uploaded and skipped invocations answer 200. Failures answer 503 when a
/// redelivery may succeed and 422 when it cannot.
#[utoipa::path(
    post,
    path = "/events",
    request_body = BucketNotification,
    responses(
        (status = 200, description = "Derivative stored or event skipped", body = EventResponse),
        (status = 400, description = "Malformed notification"),
        (status = 422, description = "Permanent failure, e.g. undecodable image"),
        (status = 503, description = "Transient failure, redelivery may succeed")
    ),
    tag = "events"
)]
pub async fn receive_event(
    State(state): State<AppState>,
    payload: Result<Json<BucketNotification>, JsonRejection>,
) -> Result<Json<EventResponse>, AppError> {
    let Json(notification) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    match state.pipeline.handle_notification(&notification).await {
        Outcome::Uploaded(uploaded) => Ok(Json(EventResponse {
            status: "uploaded".to_string(),
            bucket: Some(uploaded.bucket),
            key: Some(uploaded.key),
            size: Some(uploaded.size),
            checksum: Some(uploaded.checksum),
            reason: None,
        })),
        Outcome::Skipped(reason) => Ok(Json(EventResponse {
            status: "skipped".to_string(),
            bucket: None,
            key: None,
            size: None,
            checksum: None,
            reason: Some(reason.to_string()),
        })),
        Outcome::Failed(e) => Err(e.into()),
    }
}
