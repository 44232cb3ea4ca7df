//! Operator endpoints
//!
//! Same listener as the proxy, `/admin` prefix; the deployment keeps this
//! path operator-only at the network layer. Keys are addressed by their
//! last-8 suffix and reported masked so full key material never leaves the
//! process.
//!
//! Endpoints:
//! - GET  /admin/keys                — keys-by-pool snapshot
//! - POST /admin/keys/{suffix}/reset — operator reset of one key

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use gemini_pool::KeyState;
use serde_json::json;
use tracing::info;

use crate::error::ApiError;
use crate::proxy::AppState;

/// Admin routes, merged into the main router.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/keys", get(list_keys))
        .route("/admin/keys/{suffix}/reset", post(reset_key))
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn key_entry(state: &KeyState) -> serde_json::Value {
    match state.cooldown_remaining {
        Some(cooldown) => json!({
            "key": state.key.masked(),
            "daily_count": state.daily_count,
            "cooldown_seconds": cooldown.ceil() as u64,
        }),
        None => json!({
            "key": state.key.masked(),
            "daily_count": state.daily_count,
        }),
    }
}

/// GET /admin/keys — every key grouped by pool, masked.
async fn list_keys(State(state): State<AppState>) -> Response {
    let snapshot = match state.scheduler.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(err) => return ApiError(err).into_response(),
    };

    let entries = |states: &[KeyState]| -> Vec<serde_json::Value> {
        states.iter().map(key_entry).collect()
    };
    json_response(
        StatusCode::OK,
        json!({
            "full_token_keys": entries(&snapshot.full),
            "empty_token_keys": entries(&snapshot.empty),
            "retired_keys": entries(&snapshot.retired),
            "quarantine_keys": entries(&snapshot.quarantined),
            "banned_keys": entries(&snapshot.banned),
        }),
    )
}

/// POST /admin/keys/{suffix}/reset — clear counters and return the key to
/// the pool. 404 when no catalog key carries the suffix.
async fn reset_key(State(state): State<AppState>, Path(suffix): Path<String>) -> Response {
    let found = match state.scheduler.find_by_suffix(&suffix).await {
        Ok(found) => found,
        Err(err) => return ApiError(err).into_response(),
    };
    let Some(key) = found else {
        return json_response(
            StatusCode::NOT_FOUND,
            json!({
                "error": {
                    "code": 404,
                    "message": format!("no key with suffix {suffix}"),
                    "status": "NOT_FOUND",
                }
            }),
        );
    };

    if let Err(err) = state.scheduler.reset(&key).await {
        return ApiError(err).into_response();
    }

    info!(key = %key, "operator reset");
    json_response(
        StatusCode::OK,
        json!({
            "key": key.masked(),
            "status": "reset",
        }),
    )
}
