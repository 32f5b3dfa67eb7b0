pub mod api;
pub mod config;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::services::pipeline::Pipeline;
use axum::{
    Router,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::events::receive_event,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::events::EventResponse,
            api::handlers::health::HealthResponse,
            models::BucketNotification,
            models::NotificationRecord,
            models::NotificationEntity,
            models::NotificationBucket,
            models::NotificationObject,
        )
    ),
    tags(
        (name = "events", description = "Bucket notification intake"),
        (name = "system", description = "Service status")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route("/events", post(api::handlers::events::receive_event))
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .with_state(state)
}
