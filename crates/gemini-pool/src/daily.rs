//! Daily quota tracking
//!
//! Per-key request counter that expires at the next UTC midnight. A key
//! whose counter reaches its RPD limit is retired for the rest of the day;
//! the nightly reset job returns retired keys to the active pool.

use common::ApiKey;
use coordination::{CoordinationStore, StoreOp};
use tracing::warn;

use crate::error::Result;
use crate::keys;
use crate::time::seconds_until_utc_midnight;

/// Count one consumed request; returns the post-increment daily total.
///
/// The TTL is re-applied on every call, which keeps the expiry pinned to
/// the same midnight without a read to detect first creation.
pub async fn record_use(store: &dyn CoordinationStore, key: &ApiKey) -> Result<i64> {
    let count = store
        .incr_with_ttl(&keys::daily_count_key(key), seconds_until_utc_midnight())
        .await?;
    Ok(count)
}

/// Today's consumed-request count for a key.
pub async fn count(store: &dyn CoordinationStore, key: &ApiKey) -> Result<i64> {
    let raw = store.get(&keys::daily_count_key(key)).await?;
    Ok(raw.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0))
}

/// Retire the key if its daily counter has reached the RPD limit.
///
/// The membership change is one pipeline so the key is never observable in
/// two pools.
pub async fn check_retire(store: &dyn CoordinationStore, key: &ApiKey, rpd: u32) -> Result<bool> {
    if count(store, key).await? < rpd as i64 {
        return Ok(false);
    }

    warn!(key = %key, rpd, "daily quota reached, retiring for the day");
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
                set: keys::RETIRED_KEYS.into(),
                members: vec![member],
            },
        ])
        .await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination::MemoryStore;

    fn key() -> ApiKey {
        ApiKey::new("k-daily-test")
    }

    #[tokio::test]
    async fn record_use_counts_up() {
        let store = MemoryStore::new();
        assert_eq!(record_use(&store, &key()).await.unwrap(), 1);
        assert_eq!(record_use(&store, &key()).await.unwrap(), 2);
        assert_eq!(count(&store, &key()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn count_is_zero_for_untouched_key() {
        let store = MemoryStore::new();
        assert_eq!(count(&store, &key()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn check_retire_below_limit_is_noop() {
        let store = MemoryStore::new();
        let k = key();
        store
            .set_add(keys::FULL_TOKEN_KEYS, &[k.expose().to_string()])
            .await
            .unwrap();
        record_use(&store, &k).await.unwrap();

        assert!(!check_retire(&store, &k, 5).await.unwrap());
        assert!(store
            .set_contains(keys::FULL_TOKEN_KEYS, k.expose())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn check_retire_moves_key_out_of_active_pools() {
        let store = MemoryStore::new();
        let k = key();
        store
            .set_add(keys::FULL_TOKEN_KEYS, &[k.expose().to_string()])
            .await
            .unwrap();
        for _ in 0..3 {
            record_use(&store, &k).await.unwrap();
        }

        assert!(check_retire(&store, &k, 3).await.unwrap());
        assert!(!store
            .set_contains(keys::FULL_TOKEN_KEYS, k.expose())
            .await
            .unwrap());
        assert!(store
            .set_contains(keys::RETIRED_KEYS, k.expose())
            .await
            .unwrap());
    }
}
