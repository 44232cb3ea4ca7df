//! Failure tracking and quarantine
//!
//! Counts non-rate-limit failures per key. A key that fails past the
//! threshold is quarantined: pulled out of both active pools in one
//! pipeline and left for operator reset.

use common::ApiKey;
use coordination::{CoordinationStore, StoreOp};
use tracing::warn;

use crate::error::Result;
use crate::keys;

/// Count one failure; quarantines the key when the threshold is reached.
///
/// Returns true if this call moved the key into quarantine. Repeated calls
/// past the threshold re-issue the (idempotent) membership pipeline.
pub async fn record_failure(
    store: &dyn CoordinationStore,
    key: &ApiKey,
    threshold: u32,
) -> Result<bool> {
    let failures = store.incr(&keys::failures_key(key)).await?;

    if failures < threshold as i64 {
        warn!(key = %key, failures, "non-rate-limit failure recorded");
        return Ok(false);
    }

    warn!(key = %key, failures, "failure threshold reached, quarantining");
    let member = key.expose().to_string();
    store
        .pipeline(vec![
            StoreOp::SetRemove {
                set: keys::FULL_TOKEN_KEYS.into(),
                members: vec![member.clone()],
            },
            StoreOp::SortedSetRemove {
                set: keys::EMPTY_TOKEN_KEYS.into(),
                members: vec![member.clone()],
            },
            StoreOp::SetAdd {
                set: keys::QUARANTINE_KEYS.into(),
                members: vec![member],
            },
        ])
        .await?;
    Ok(true)
}

/// Current failure count for a key.
pub async fn count(store: &dyn CoordinationStore, key: &ApiKey) -> Result<i64> {
    let raw = store.get(&keys::failures_key(key)).await?;
    Ok(raw.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0))
}
