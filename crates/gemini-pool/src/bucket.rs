//! Per-key token bucket
//!
//! One bucket per key, stored as a `{tokens, last_refill}` hash in the
//! coordination store. Capacity equals the effective RPM; tokens accrue at
//! RPM/60 per second. The refill write is unconditional (last writer wins):
//! concurrent refills converge because `last_refill` only moves forward, and
//! a double-counted elapsed window is bounded by one request interval.
//! Approximate RPM enforcement is the contract, not an exact budget.

use common::ApiKey;
use coordination::CoordinationStore;

use crate::error::Result;
use crate::keys;
use crate::time::now_secs;

/// Outcome of one consume attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Consume {
    pub granted: bool,
    /// Tokens left after the attempt (fractional).
    pub remaining: f64,
}

/// Seconds until a drained bucket yields its next token.
pub fn next_refill_delay(rpm: u32) -> f64 {
    60.0 / rpm.max(1) as f64
}

/// Refill the bucket from elapsed time and return the current token count.
///
/// A missing bucket is initialized full. Damaged fields fall back to a full
/// bucket rather than failing the request path.
pub async fn refill(store: &dyn CoordinationStore, key: &ApiKey, rpm: u32) -> Result<f64> {
    let bucket_key = keys::bucket_key(key);
    let now = now_secs();
    let fields = store.hash_get_all(&bucket_key).await?;

    if fields.is_empty() {
        store
            .hash_set(
                &bucket_key,
                &[
                    ("tokens".to_string(), (rpm as f64).to_string()),
                    ("last_refill".to_string(), now.to_string()),
                ],
            )
            .await?;
        return Ok(rpm as f64);
    }

    let tokens = fields
        .get("tokens")
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(rpm as f64);
    let last_refill = fields
        .get("last_refill")
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(now);

    let elapsed = (now - last_refill).max(0.0);
    let current = (tokens + elapsed * rpm as f64 / 60.0).min(rpm as f64);

    store
        .hash_set(
            &bucket_key,
            &[
                ("tokens".to_string(), current.to_string()),
                ("last_refill".to_string(), now.to_string()),
            ],
        )
        .await?;
    Ok(current)
}

/// Refill, then take one token if at least one is available.
///
/// The decrement is a store-side float increment, not a test-and-set; a
/// lost race costs at most one token of accuracy.
pub async fn try_consume(store: &dyn CoordinationStore, key: &ApiKey, rpm: u32) -> Result<Consume> {
    let tokens = refill(store, key, rpm).await?;
    if tokens >= 1.0 {
        store
            .hash_incr_by_float(&keys::bucket_key(key), "tokens", -1.0)
            .await?;
        Ok(Consume {
            granted: true,
            remaining: tokens - 1.0,
        })
    } else {
        Ok(Consume {
            granted: false,
            remaining: tokens,
        })
    }
}

/// Reset the bucket to full capacity (operator reset, startup init).
pub async fn reset(store: &dyn CoordinationStore, key: &ApiKey, rpm: u32) -> Result<()> {
    store
        .hash_set(
            &keys::bucket_key(key),
            &[
                ("tokens".to_string(), (rpm as f64).to_string()),
                ("last_refill".to_string(), now_secs().to_string()),
            ],
        )
        .await?;
    Ok(())
}
