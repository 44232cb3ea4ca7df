//! HTTP mapping of pool errors
//!
//! Error bodies use the upstream's JSON envelope shape so downstream
//! clients see one consistent format whether the error came from the
//! upstream or from this gateway.

use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use gemini_pool::Error as PoolError;
use tracing::error;

/// Wrapper making pool errors returnable from axum handlers.
#[derive(Debug)]
pub struct ApiError(pub PoolError);

impl From<PoolError> for ApiError {
    fn from(err: PoolError) -> Self {
        Self(err)
    }
}

/// Build the gateway's JSON error envelope.
fn envelope(code: StatusCode, status: &str, message: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "code": code.as_u16(),
            "message": message,
            "status": status,
        }
    });
    (
        code,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            PoolError::NoCapacity(message) => {
                envelope(StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", &message)
            }
            PoolError::CircuitOpen(message) => {
                envelope(StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", &message)
            }
            // Upstream 4xx passes through unchanged
            PoolError::ClientError { status, body } => Response::builder()
                .status(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap_or_else(|_| StatusCode::BAD_REQUEST.into_response()),
            PoolError::UpstreamUnavailable {
                attempts,
                last_status,
            } => envelope(
                StatusCode::SERVICE_UNAVAILABLE,
                "UNAVAILABLE",
                &format!(
                    "all {attempts} retry attempts failed (last upstream status: {})",
                    last_status.map_or_else(|| "none".to_string(), |s| s.to_string())
                ),
            ),
            PoolError::Store(e) => {
                error!(error = %e, "coordination store failure");
                envelope(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "coordination store failure",
                )
            }
            PoolError::Catalog(e) => {
                error!(error = %e, "catalog failure");
                envelope(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", "catalog failure")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: PoolError) -> StatusCode {
        ApiError(err).into_response().status()
    }

    #[test]
    fn capacity_and_breaker_map_to_503() {
        assert_eq!(
            status_of(PoolError::NoCapacity("drained".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(PoolError::CircuitOpen("open".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(PoolError::UpstreamUnavailable {
                attempts: 3,
                last_status: Some(502)
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn client_errors_pass_through_status_and_body() {
        let response = ApiError(PoolError::ClientError {
            status: 404,
            body: r#"{"error":{"code":404}}"#.into(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn store_errors_are_internal() {
        let err = PoolError::Catalog("disk full".into());
        assert_eq!(status_of(err), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
