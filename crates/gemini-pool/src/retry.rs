//! Retry driver and failure classification
//!
//! Wraps one downstream request: acquire a key, attempt the upstream call,
//! classify the outcome, and either return, surface a client error, or
//! rotate to the next key until the retry budget is spent.

use std::future::Future;

use common::ApiKey;
use tracing::warn;

use crate::breaker::CircuitBreaker;
use crate::error::{Error, Result};
use crate::scheduler::KeyScheduler;

/// Upstream marker for an invalid key; the provider attaches it to 403 and
/// some 400 responses.
const BAN_MARKER: &str = "API_KEY_INVALID";

/// What one failed attempt means for the key that made it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// 4xx other than 429: the caller's fault. Surface unchanged, do not
    /// retry, do not penalize the key.
    Client,
    /// 429 / 5xx / transport: penalize the key and rotate to the next one.
    Retryable,
    /// Upstream ban signal: drop the key from the pool permanently.
    Ban,
}

/// One failed upstream attempt. Transport failures carry no status.
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    pub status: Option<u16>,
    pub body: String,
}

impl AttemptFailure {
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            body: body.into(),
        }
    }

    pub fn transport(detail: impl Into<String>) -> Self {
        Self {
            status: None,
            body: detail.into(),
        }
    }
}

/// Classify a failed attempt by status and response body.
pub fn classify(status: Option<u16>, body: &str) -> FailureKind {
    if status == Some(403) || body.contains(BAN_MARKER) {
        return FailureKind::Ban;
    }
    match status {
        Some(429) => FailureKind::Retryable,
        Some(s) if (400..500).contains(&s) => FailureKind::Client,
        // 5xx and transport failures
        _ => FailureKind::Retryable,
    }
}

/// Drive one downstream request through up to `max_retries` upstream
/// attempts, acquiring a fresh key for each.
///
/// `attempt` issues the upstream call with the key it is handed. Client
/// errors abort immediately; every observed 5xx also feeds the global
/// breaker window. Cancellation propagates by dropping the future — no
/// bucket tokens are refunded.
pub async fn run_with_retries<T, F, Fut>(
    scheduler: &KeyScheduler,
    breaker: &CircuitBreaker,
    model: &str,
    max_retries: u32,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut(ApiKey) -> Fut,
    Fut: Future<Output = std::result::Result<T, AttemptFailure>>,
{
    let attempts = max_retries.max(1);
    let mut last_status = None;

    for n in 1..=attempts {
        let key = scheduler.acquire(model).await?;

        match attempt(key.clone()).await {
            Ok(value) => return Ok(value),
            Err(failed) => {
                last_status = failed.status;

                if classify(failed.status, &failed.body) == FailureKind::Client {
                    return Err(Error::ClientError {
                        status: failed.status.unwrap_or(400),
                        body: failed.body,
                    });
                }

                if matches!(failed.status, Some(s) if s >= 500)
                    && let Err(e) = breaker.record_upstream_failure().await
                {
                    warn!(error = %e, "failed to record upstream failure in breaker window");
                }

                warn!(
                    attempt = n,
                    max_retries = attempts,
                    key = %key,
                    status = ?failed.status,
                    "upstream attempt failed, rotating key"
                );
                scheduler
                    .release_on_failure(&key, failed.status, &failed.body)
                    .await?;
            }
        }
    }

    Err(Error::UpstreamUnavailable {
        attempts,
        last_status,
    })
}
