//! Upstream proxy routes
//!
//! Exposes the provider's native generate endpoints and forwards payloads
//! opaquely. Each request is gated by the global circuit breaker, then
//! driven through the retry loop: acquire a key, call upstream with the key
//! as the `key` query parameter, rotate on retryable failures.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use gemini_pool::{AttemptFailure, CircuitBreaker, KeyScheduler, run_with_retries};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::metrics;

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<KeyScheduler>,
    pub breaker: Arc<CircuitBreaker>,
    pub client: reqwest::Client,
    /// Upstream base URL without trailing slash.
    pub upstream_base: String,
    pub max_retries: u32,
    pub started_at: Instant,
    pub prometheus: PrometheusHandle,
}

/// Build the gateway router: proxy routes, health, metrics, admin.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        // The model and operation share one path segment
        // (`gemini-2.5-flash:generateContent`), so the route captures the
        // whole segment and splits on the colon.
        .route("/v1beta/models/{model_op}", post(generate))
        .merge(crate::admin::admin_routes())
        .with_state(state)
}

/// POST /v1beta/models/{model}:{operation}
async fn generate(
    State(state): State<AppState>,
    Path(model_op): Path<String>,
    axum::Json(payload): axum::Json<Value>,
) -> Response {
    let started = Instant::now();
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());

    let Some((model, operation)) = model_op.split_once(':') else {
        return not_found(&model_op);
    };
    if !matches!(operation, "generateContent" | "streamGenerateContent") {
        return not_found(&model_op);
    }

    let result = proxy_generate(&state, model, operation, payload).await;
    let latency = started.elapsed();

    let response = match result {
        Ok(response) => response,
        Err(err) => {
            warn!(request_id, model, error = %err, "request failed");
            ApiError(err).into_response()
        }
    };

    metrics::record_request(response.status().as_u16(), model, latency.as_secs_f64());
    info!(
        request_id,
        model,
        operation,
        status = response.status().as_u16(),
        latency_ms = latency.as_millis() as u64,
        "proxied request"
    );
    response
}

/// Breaker gate, then the operation-specific retry loop.
async fn proxy_generate(
    state: &AppState,
    model: &str,
    operation: &str,
    payload: Value,
) -> gemini_pool::Result<Response> {
    state.breaker.check().await?;
    match operation {
        "generateContent" => proxy_json(state, model, payload).await,
        _ => proxy_stream(state, model, payload).await,
    }
}

/// Non-streaming generation: the whole JSON body is read inside the retry
/// loop, so a connection dropped mid-body still rotates to the next key.
async fn proxy_json(
    state: &AppState,
    model: &str,
    payload: Value,
) -> gemini_pool::Result<Response> {
    let model_owned = model.to_string();
    let value: Value = run_with_retries(
        &state.scheduler,
        &state.breaker,
        model,
        state.max_retries,
        move |key| {
            let client = state.client.clone();
            let payload = payload.clone();
            let url = format!(
                "{}/models/{}:generateContent?key={}",
                state.upstream_base,
                model_owned,
                key.expose()
            );
            async move {
                let response = client
                    .post(&url)
                    .json(&payload)
                    .send()
                    .await
                    .map_err(|e| AttemptFailure::transport(e.to_string()))?;

                let status = response.status();
                if status.is_success() {
                    response
                        .json::<Value>()
                        .await
                        .map_err(|e| AttemptFailure::transport(format!("reading upstream body: {e}")))
                } else {
                    let body = response.text().await.unwrap_or_default();
                    Err(AttemptFailure::http(status.as_u16(), body))
                }
            }
        },
    )
    .await?;
    Ok(axum::Json(value).into_response())
}

/// Streaming generation: retries apply until upstream answers with a
/// success status, then the byte stream is forwarded verbatim. A failure
/// mid-stream is the client's to handle; consumed tokens are not refunded.
async fn proxy_stream(
    state: &AppState,
    model: &str,
    payload: Value,
) -> gemini_pool::Result<Response> {
    let model_owned = model.to_string();
    let upstream = run_with_retries(
        &state.scheduler,
        &state.breaker,
        model,
        state.max_retries,
        move |key| {
            let client = state.client.clone();
            let payload = payload.clone();
            let url = format!(
                "{}/models/{}:streamGenerateContent?alt=sse&key={}",
                state.upstream_base,
                model_owned,
                key.expose()
            );
            async move {
                let response = client
                    .post(&url)
                    .json(&payload)
                    .send()
                    .await
                    .map_err(|e| AttemptFailure::transport(e.to_string()))?;

                let status = response.status();
                if status.is_success() {
                    Ok(response)
                } else {
                    let body = response.text().await.unwrap_or_default();
                    Err(AttemptFailure::http(status.as_u16(), body))
                }
            }
        },
    )
    .await?;
    Ok(stream_response(upstream))
}

/// Forward the upstream byte stream verbatim.
fn stream_response(upstream: reqwest::Response) -> Response {
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| header::HeaderValue::from_static("text/event-stream"));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from_stream(upstream.bytes_stream()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn not_found(model_op: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "code": 404,
            "message": format!("unknown operation: {model_op}"),
            "status": "NOT_FOUND",
        }
    });
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// GET /health — pool-derived service health.
async fn health(State(state): State<AppState>) -> Response {
    let snapshot = match state.scheduler.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(err) => return ApiError(err).into_response(),
    };
    metrics::record_pool_state(&snapshot);

    let available = snapshot.available();
    let total = snapshot.total();
    let status = if available > 0 && available == total {
        "healthy"
    } else if available > 0 {
        "degraded"
    } else {
        "unhealthy"
    };

    let body = serde_json::json!({
        "status": status,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "keys_total": total,
        "keys_full": snapshot.full.len(),
        "keys_empty": snapshot.empty.len(),
        "keys_retired": snapshot.retired.len(),
        "keys_quarantined": snapshot.quarantined.len(),
        "keys_banned": snapshot.banned.len(),
    });
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// GET /metrics — Prometheus text exposition.
async fn render_metrics(State(state): State<AppState>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus.render(),
    )
        .into_response()
}
