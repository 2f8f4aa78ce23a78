pub mod control_messages;
pub mod control_ws;
pub mod rate_limit;
pub mod storage_api;
pub mod stream_ws;
pub mod workflows;

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::metrics;
use crate::session::SessionManager;
use vstream_registry::SessionRegistry;
use vstream_storage_state::StorageStateStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
    pub manager: Arc<SessionManager>,
    pub store: Option<Arc<StorageStateStore>>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/workflows/visual", post(workflows::start_session))
        .route("/workflows/visual/sessions", get(workflows::list_sessions))
        .route(
            "/workflows/visual/:session_id/status",
            get(workflows::session_status),
        )
        .route(
            "/workflows/visual/:session_id/stream",
            get(stream_ws::stream_handler),
        )
        .route(
            "/workflows/visual/:session_id/control",
            get(control_ws::control_handler),
        )
        .route("/auth/storage-state/latest", get(storage_api::latest))
        .route("/auth/storage-state/:record_id", put(storage_api::replace))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.registry.len(),
    }))
}

async fn metrics_handler() -> impl IntoResponse {
    metrics::render()
}
