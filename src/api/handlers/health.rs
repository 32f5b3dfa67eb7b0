use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub target_width: u32,
    pub size_tag: String,
    pub version: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.pipeline.config();

    Json(HealthResponse {
        status: "ok".to_string(),
        target_width: config.target_width,
        size_tag: config.size_tag.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
