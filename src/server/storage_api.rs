use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use vstream_crypto_envelope::{CryptoError, SealedBlob};
use vstream_storage_state::{RecordMetadata, StorageStateRecord, StoreError};

use crate::server::AppState;

const OWNER_HEADER: &str = "x-user-id";

/// Caller identity as established by the auth collaborator upstream of this
/// service; token validation itself happens there.
fn owner_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(OWNER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    /// Comma-separated site labels, e.g. `google,linkedin`.
    #[serde(default)]
    pub sites: Option<String>,
}

pub async fn latest(
    State(state): State<AppState>,
    Query(query): Query<LatestQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let Some(owner_id) = owner_from_headers(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "missing_owner"})),
        );
    };
    let Some(store) = &state.store else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "storage_state_unavailable"})),
        );
    };

    let sites: Vec<String> = query
        .sites
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|site| !site.is_empty())
        .map(str::to_string)
        .collect();

    let record = match store
        .latest_verified(&owner_id, &sites, state.config.cookie_verify_ttl_hours)
        .await
    {
        Ok(Some(record)) => record,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "no_verified_storage_state"})),
            );
        }
        Err(err) => {
            warn!(target: "storage-api", owner = %owner_id, %err, "latest lookup failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "storage_state_lookup_failed"})),
            );
        }
    };

    match store.load_plaintext(&record) {
        Ok(blob) => (
            StatusCode::OK,
            Json(json!({
                "record_id": record.record_id,
                "created_at": record.created_at,
                "metadata": record.metadata,
                "verified": record.verified,
                "storage_state": blob,
            })),
        ),
        Err(err) => {
            warn!(target: "storage-api", record = %record.record_id, %err, "decrypt failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "storage_state_decrypt_failed"})),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReplaceRequest {
    #[serde(flatten)]
    pub sealed: SealedBlob,
    #[serde(default)]
    pub metadata: RecordMetadata,
}

pub async fn replace(
    State(state): State<AppState>,
    Path(record_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ReplaceRequest>,
) -> impl IntoResponse {
    let Some(owner_id) = owner_from_headers(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "missing_owner"})),
        );
    };
    let Some(store) = &state.store else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "storage_state_unavailable"})),
        );
    };

    match store
        .replace(&owner_id, &record_id, request.sealed, request.metadata)
        .await
    {
        Ok(record) => (StatusCode::OK, Json(record_summary(&record))),
        Err(StoreError::NotFound { .. }) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "record_not_found"})),
        ),
        Err(StoreError::OwnershipDenied { .. }) => (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "not_record_owner"})),
        ),
        Err(StoreError::Crypto(err)) => {
            let error = match err {
                CryptoError::KidMismatch { .. } => "kid_mismatch",
                CryptoError::KeyMissing { .. } => "key_missing",
                CryptoError::ParseFailed(_) => "parse_failed",
                CryptoError::DecryptFailed => "decrypt_failed",
            };
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"error": error})),
            )
        }
        Err(err) => {
            warn!(target: "storage-api", record = %record_id, %err, "replace failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "storage_state_replace_failed"})),
            )
        }
    }
}

fn record_summary(record: &StorageStateRecord) -> serde_json::Value {
    json!({
        "record_id": record.record_id,
        "status": record.status,
        "verified": record.verified,
        "metadata": record.metadata,
        "created_at": record.created_at,
    })
}
