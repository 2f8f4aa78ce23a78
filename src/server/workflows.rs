use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use vstream_core_types::{SessionId, WireErrorKind};

use crate::server::AppState;
use crate::session::WorkflowStep;

fn default_owner() -> String {
    "anonymous".to_string()
}

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    #[serde(default = "default_owner")]
    pub owner_id: String,
    #[serde(default)]
    pub workflow: Vec<WorkflowStep>,
    /// Sites the caller wants authenticated state for, e.g. `["google"]`.
    #[serde(default)]
    pub sites: Vec<String>,
}

pub async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> impl IntoResponse {
    let session_id = state
        .manager
        .start_session(request.owner_id, request.workflow, request.sites)
        .await;
    (
        StatusCode::ACCEPTED,
        Json(json!({"session_id": session_id})),
    )
}

pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({"sessions": state.manager.list()}))
}

/// Streamer status for one session, plus the manager's lifecycle phase.
pub async fn session_status(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> impl IntoResponse {
    let Ok(session_id) = SessionId::parse(&raw_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": WireErrorKind::InvalidMessage})),
        );
    };

    let Some(session) = state.manager.session(&session_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": WireErrorKind::SessionNotFound})),
        );
    };

    let streaming = state
        .registry
        .lookup(&session_id)
        .map(|entry| entry.streamer.status());
    let mut body = match streaming {
        Some(status) => serde_json::to_value(&status).unwrap_or_else(|_| json!({})),
        None => json!({
            "streaming_active": false,
            "streaming_ready": false,
            "events_processed": 0,
            "events_buffered": 0,
            "connected_clients": 0,
        }),
    };
    body["phase"] = json!(session.phase());
    body["degraded"] = json!(session.degraded());
    (StatusCode::OK, Json(body))
}
