//! Background key activation
//!
//! Two independent jobs share the coordination store with the request path:
//! a frequent tick that promotes keys out of cooldown once their refill
//! time arrives, and a nightly job that un-retires keys after the UTC
//! day rolls over. Each cycle body is a standalone function so tests can
//! drive single cycles without the timer.

use std::sync::Arc;
use std::time::Duration;

use common::ApiKey;
use coordination::{CoordinationStore, StoreOp};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::keys;
use crate::time::{now_secs, seconds_until_daily_reset};

/// Promote keys whose cooldown has elapsed from EMPTY back to HAS_TOKENS.
///
/// A key quarantined between our range read and the pipeline must not be
/// re-admitted, so quarantine membership is checked per key and such keys
/// are skipped. Returns the number of keys promoted.
pub async fn activate_ready_keys(store: &dyn CoordinationStore) -> Result<usize> {
    let ready = store
        .sorted_set_range_by_score(keys::EMPTY_TOKEN_KEYS, now_secs())
        .await?;
    if ready.is_empty() {
        return Ok(0);
    }

    let mut promotable = Vec::with_capacity(ready.len());
    for member in ready {
        if store.set_contains(keys::QUARANTINE_KEYS, &member).await? {
            debug!(key = %ApiKey::new(member), "skipping quarantined key in cooldown set");
            continue;
        }
        promotable.push(member);
    }
    if promotable.is_empty() {
        return Ok(0);
    }

    store
        .pipeline(vec![
            StoreOp::SetAdd {
                set: keys::FULL_TOKEN_KEYS.into(),
                members: promotable.clone(),
            },
            StoreOp::SortedSetRemove {
                set: keys::EMPTY_TOKEN_KEYS.into(),
                members: promotable.clone(),
            },
        ])
        .await?;

    debug!(count = promotable.len(), "activated keys from cooldown");
    Ok(promotable.len())
}

/// Return every retired key to HAS_TOKENS and clear its daily counter.
///
/// Runs at the start of the UTC day; buckets are left alone (they refill
/// from elapsed time on first use). Returns the number of keys restored.
pub async fn reset_retired_keys(store: &dyn CoordinationStore) -> Result<usize> {
    let retired = store.set_members(keys::RETIRED_KEYS).await?;
    if retired.is_empty() {
        info!("no retired keys to reset");
        return Ok(0);
    }

    let daily_keys: Vec<String> = retired
        .iter()
        .map(|member| keys::daily_count_key(&ApiKey::new(member.clone())))
        .collect();
    store
        .pipeline(vec![
            StoreOp::SetAdd {
                set: keys::FULL_TOKEN_KEYS.into(),
                members: retired.clone(),
            },
            StoreOp::Delete {
                keys: vec![keys::RETIRED_KEYS.into()],
            },
            StoreOp::Delete { keys: daily_keys },
        ])
        .await?;

    info!(count = retired.len(), "reset retired keys into the token bucket pool");
    Ok(retired.len())
}

/// Spawn the cooldown-promotion tick.
///
/// Runs every `interval` (1 s in production). The first tick is skipped —
/// buckets were just initialized.
pub fn spawn_activation_task(
    store: Arc<dyn CoordinationStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = activate_ready_keys(store.as_ref()).await {
                warn!(error = %e, "key activation cycle failed");
            }
        }
    })
}

/// Spawn the nightly un-retire job (00:00:05 UTC).
pub fn spawn_daily_reset_task(store: Arc<dyn CoordinationStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let delay = seconds_until_daily_reset();
            debug!(delay_secs = delay, "daily reset sleeping until 00:00:05 UTC");
            tokio::time::sleep(Duration::from_secs(delay)).await;
            if let Err(e) = reset_retired_keys(store.as_ref()).await {
                warn!(error = %e, "daily retired-key reset failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination::MemoryStore;

    #[tokio::test]
    async fn promotes_only_keys_past_their_refill_time() {
        let store = MemoryStore::new();
        let now = now_secs();
        store
            .sorted_set_add(keys::EMPTY_TOKEN_KEYS, "ready", now - 1.0)
            .await
            .unwrap();
        store
            .sorted_set_add(keys::EMPTY_TOKEN_KEYS, "waiting", now + 120.0)
            .await
            .unwrap();

        let promoted = activate_ready_keys(&store).await.unwrap();
        assert_eq!(promoted, 1);
        assert!(store
            .set_contains(keys::FULL_TOKEN_KEYS, "ready")
            .await
            .unwrap());
        let remaining = store
            .sorted_set_entries(keys::EMPTY_TOKEN_KEYS)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0, "waiting");
    }

    #[tokio::test]
    async fn empty_cooldown_set_is_a_noop() {
        let store = MemoryStore::new();
        assert_eq!(activate_ready_keys(&store).await.unwrap(), 0);
        assert!(store
            .set_members(keys::FULL_TOKEN_KEYS)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn quarantined_keys_are_never_readmitted() {
        let store = MemoryStore::new();
        let now = now_secs();
        store
            .sorted_set_add(keys::EMPTY_TOKEN_KEYS, "bad", now - 1.0)
            .await
            .unwrap();
        store
            .set_add(keys::QUARANTINE_KEYS, &["bad".to_string()])
            .await
            .unwrap();

        let promoted = activate_ready_keys(&store).await.unwrap();
        assert_eq!(promoted, 0);
        assert!(!store
            .set_contains(keys::FULL_TOKEN_KEYS, "bad")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn daily_reset_restores_retired_keys_and_counters() {
        let store = MemoryStore::new();
        store
            .set_add(keys::RETIRED_KEYS, &["k1".to_string(), "k2".to_string()])
            .await
            .unwrap();
        store
            .incr_with_ttl("key:k1:daily_count", 3600)
            .await
            .unwrap();

        let restored = reset_retired_keys(&store).await.unwrap();
        assert_eq!(restored, 2);

        let mut full = store.set_members(keys::FULL_TOKEN_KEYS).await.unwrap();
        full.sort();
        assert_eq!(full, vec!["k1", "k2"]);
        assert!(store
            .set_members(keys::RETIRED_KEYS)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.get("key:k1:daily_count").await.unwrap(), None);
    }

    #[tokio::test]
    async fn daily_reset_with_nothing_retired_is_a_noop() {
        let store = MemoryStore::new();
        assert_eq!(reset_retired_keys(&store).await.unwrap(), 0);
    }
}
