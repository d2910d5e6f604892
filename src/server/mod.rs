mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::state::*;

#[derive(OpenApi)]
#[openapi(
    paths(api::match_handler, api::update_handler, api::health_handler),
    components(schemas(
        types::MatchForm,
        types::MatchResponse,
        types::UpdateResponse,
        types::StatusResponse,
        types::ErrorResponse,
    ))
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/match", post(api::match_handler))
        .route("/match_uploaded_face", post(api::match_handler))
        .route("/update", get(api::update_handler).post(api::update_handler))
        .route("/update_encodings", get(api::update_handler).post(api::update_handler))
        .route("/health", get(api::health_handler))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::disable())
        // 上传限制：10M
        .layer(RequestBodyLimitLayer::new(1024 * 1024 * 10))
        .with_state(state)
}
