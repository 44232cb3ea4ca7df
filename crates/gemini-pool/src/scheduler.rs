//! Key scheduler
//!
//! Public surface of the pool: `acquire` picks the key for one upstream
//! request, `release_on_failure` applies the failure classification, and
//! `reset` is the operator escape hatch for quarantined/retired keys.
//!
//! Selection is a uniformly random atomic pop from the HAS_TOKENS set, so
//! replicas need no cross-process coordination beyond the store itself.
//! Each acquire iteration removes the popped key from HAS_TOKENS and either
//! returns it or files it into another pool, so the loop is bounded by the
//! set size.

use std::sync::Arc;

use common::ApiKey;
use coordination::{CoordinationStore, StoreOp};
use metrics::counter;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, KeyStatus};
use crate::error::{Error, Result};
use crate::policy::RateLimitPolicy;
use crate::retry::{FailureKind, classify};
use crate::time::now_secs;
use crate::{bucket, daily, failure, keys};

/// One key's entry in a status snapshot.
#[derive(Debug, Clone)]
pub struct KeyState {
    pub key: ApiKey,
    pub daily_count: i64,
    /// Seconds until the next token arrives; set for EMPTY keys only.
    pub cooldown_remaining: Option<f64>,
}

/// Keys grouped by their current pool, plus catalog-banned keys.
#[derive(Debug, Clone, Default)]
pub struct PoolSnapshot {
    pub full: Vec<KeyState>,
    pub empty: Vec<KeyState>,
    pub retired: Vec<KeyState>,
    pub quarantined: Vec<KeyState>,
    pub banned: Vec<KeyState>,
}

impl PoolSnapshot {
    /// Keys currently eligible for selection.
    pub fn available(&self) -> usize {
        self.full.len()
    }

    /// All keys the scheduler knows about, banned included.
    pub fn total(&self) -> usize {
        self.full.len()
            + self.empty.len()
            + self.retired.len()
            + self.quarantined.len()
            + self.banned.len()
    }
}

/// Scheduler over the shared key pool.
///
/// Carries no mutable in-process state: configuration plus handles to the
/// coordination store and catalog. Instantiated once per process and
/// injected where needed.
pub struct KeyScheduler {
    store: Arc<dyn CoordinationStore>,
    catalog: Arc<dyn Catalog>,
    policy: RateLimitPolicy,
    max_failures: u32,
}

impl KeyScheduler {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        catalog: Arc<dyn Catalog>,
        policy: RateLimitPolicy,
        max_failures: u32,
    ) -> Self {
        Self {
            store,
            catalog,
            policy,
            max_failures,
        }
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    /// Load catalog-active keys into HAS_TOKENS with freshly initialized
    /// buckets, replacing any stale pool membership from a previous run.
    /// Quarantine membership survives restarts.
    ///
    /// Returns the number of active keys loaded.
    pub async fn initialize(&self) -> Result<usize> {
        let listed = self
            .catalog
            .list_keys()
            .await
            .map_err(|e| Error::Catalog(format!("loading key catalog: {e}")))?;
        let active: Vec<ApiKey> = listed
            .into_iter()
            .filter(|(_, status)| *status == KeyStatus::Active)
            .map(|(key, _)| key)
            .collect();

        let mut ops = vec![StoreOp::Delete {
            keys: vec![
                keys::FULL_TOKEN_KEYS.into(),
                keys::EMPTY_TOKEN_KEYS.into(),
                keys::RETIRED_KEYS.into(),
            ],
        }];
        if !active.is_empty() {
            ops.push(StoreOp::SetAdd {
                set: keys::FULL_TOKEN_KEYS.into(),
                members: active.iter().map(|k| k.expose().to_string()).collect(),
            });
            let now = now_secs();
            for key in &active {
                let limits = self.policy.resolve(key, "default");
                ops.push(StoreOp::HashSet {
                    key: keys::bucket_key(key),
                    fields: vec![
                        ("tokens".to_string(), (limits.rpm as f64).to_string()),
                        ("last_refill".to_string(), now.to_string()),
                    ],
                });
            }
        }
        self.store.pipeline(ops).await?;

        info!(keys = active.len(), "initialized active keys into the token bucket pool");
        Ok(active.len())
    }

    /// Pick a key for one request against `model`.
    ///
    /// Enforces RPD before RPM: a key over its daily quota is retired and
    /// the loop moves on. A granted key has its daily counter bumped and is
    /// returned to HAS_TOKENS (or filed into EMPTY when this was its last
    /// token).
    pub async fn acquire(&self, model: &str) -> Result<ApiKey> {
        loop {
            let Some(member) = self.store.set_pop_random(keys::FULL_TOKEN_KEYS).await? else {
                counter!("pool_no_capacity_total").increment(1);
                return Err(Error::NoCapacity(
                    "all API keys are currently rate-limited".into(),
                ));
            };
            let key = ApiKey::new(member);
            let limits = self.policy.resolve(&key, model);

            if daily::check_retire(self.store.as_ref(), &key, limits.rpd).await? {
                continue;
            }

            let consume = bucket::try_consume(self.store.as_ref(), &key, limits.rpm).await?;
            let cooldown_score = now_secs() + bucket::next_refill_delay(limits.rpm);

            if consume.granted {
                daily::record_use(self.store.as_ref(), &key).await?;
                if consume.remaining >= 1.0 {
                    self.store
                        .set_add(keys::FULL_TOKEN_KEYS, &[key.expose().to_string()])
                        .await?;
                } else {
                    self.store
                        .sorted_set_add(keys::EMPTY_TOKEN_KEYS, key.expose(), cooldown_score)
                        .await?;
                }
                counter!("pool_acquire_total").increment(1);
                debug!(key = %key, model, remaining = consume.remaining, "key acquired");
                return Ok(key);
            }

            self.store
                .sorted_set_add(keys::EMPTY_TOKEN_KEYS, key.expose(), cooldown_score)
                .await?;
        }
    }

    /// Apply the failure classification for a finished upstream attempt.
    ///
    /// Client errors leave the key untouched. Ban signals mark the key
    /// banned in the catalog and drop it from every pool. Everything else
    /// counts toward quarantine.
    pub async fn release_on_failure(
        &self,
        key: &ApiKey,
        status: Option<u16>,
        body: &str,
    ) -> Result<()> {
        match classify(status, body) {
            FailureKind::Client => Ok(()),
            FailureKind::Ban => self.ban(key).await,
            FailureKind::Retryable => {
                let quarantined =
                    failure::record_failure(self.store.as_ref(), key, self.max_failures).await?;
                if quarantined {
                    counter!("pool_quarantined_total").increment(1);
                    if let Err(e) = self.catalog.mark_limited(key).await {
                        warn!(key = %key, error = %e, "catalog limited-mark failed");
                    }
                }
                Ok(())
            }
        }
    }

    /// Drop a key from every pool and record the ban in the catalog.
    async fn ban(&self, key: &ApiKey) -> Result<()> {
        warn!(key = %key, "upstream ban signal, removing key");
        counter!("pool_banned_total").increment(1);
        if let Err(e) = self.catalog.mark_banned(key).await {
            warn!(key = %key, error = %e, "catalog ban-mark failed");
        }
        let member = key.expose().to_string();
        self.store
            .pipeline(vec![
                StoreOp::SetRemove {
                    set: keys::FULL_TOKEN_KEYS.into(),
                    members: vec![member.clone()],
                },
                StoreOp::SortedSetRemove {
                    set: keys::EMPTY_TOKEN_KEYS.into(),
                    members: vec![member.clone()],
                },
                StoreOp::SetRemove {
                    set: keys::RETIRED_KEYS.into(),
                    members: vec![member.clone()],
                },
                StoreOp::SetRemove {
                    set: keys::QUARANTINE_KEYS.into(),
                    members: vec![member],
                },
            ])
            .await?;
        Ok(())
    }

    /// Operator reset: clear counters, re-init the bucket to full, return
    /// the key to HAS_TOKENS, and restore catalog status to active.
    pub async fn reset(&self, key: &ApiKey) -> Result<()> {
        if let Err(e) = self.catalog.reset_active(key).await {
            warn!(key = %key, error = %e, "catalog reset failed");
        }

        let limits = self.policy.resolve(key, "default");
        let member = key.expose().to_string();
        self.store
            .pipeline(vec![
                StoreOp::SetRemove {
                    set: keys::QUARANTINE_KEYS.into(),
                    members: vec![member.clone()],
                },
                StoreOp::SetRemove {
                    set: keys::RETIRED_KEYS.into(),
                    members: vec![member.clone()],
                },
                StoreOp::SortedSetRemove {
                    set: keys::EMPTY_TOKEN_KEYS.into(),
                    members: vec![member.clone()],
                },
                StoreOp::Delete {
                    keys: vec![keys::failures_key(key), keys::daily_count_key(key)],
                },
                StoreOp::HashSet {
                    key: keys::bucket_key(key),
                    fields: vec![
                        ("tokens".to_string(), (limits.rpm as f64).to_string()),
                        ("last_refill".to_string(), now_secs().to_string()),
                    ],
                },
                StoreOp::SetAdd {
                    set: keys::FULL_TOKEN_KEYS.into(),
                    members: vec![member],
                },
            ])
            .await?;

        info!(key = %key, "key fully reset and returned to the pool");
        Ok(())
    }

    /// Find a catalog key by its last-8 suffix (operator endpoints address
    /// keys by suffix so full key material stays out of URLs).
    pub async fn find_by_suffix(&self, suffix: &str) -> Result<Option<ApiKey>> {
        let listed = self
            .catalog
            .list_keys()
            .await
            .map_err(|e| Error::Catalog(format!("loading key catalog: {e}")))?;
        Ok(listed
            .into_iter()
            .map(|(key, _)| key)
            .find(|key| key.suffix() == suffix))
    }

    /// Status snapshot of every pool, with daily counts and cooldowns.
    pub async fn snapshot(&self) -> Result<PoolSnapshot> {
        let now = now_secs();
        let full = self.store.set_members(keys::FULL_TOKEN_KEYS).await?;
        let empty = self.store.sorted_set_entries(keys::EMPTY_TOKEN_KEYS).await?;
        let retired = self.store.set_members(keys::RETIRED_KEYS).await?;
        let quarantined = self.store.set_members(keys::QUARANTINE_KEYS).await?;
        let banned = self.catalog.banned_keys().await.unwrap_or_default();

        let mut snapshot = PoolSnapshot::default();
        for member in full {
            snapshot.full.push(self.key_state(ApiKey::new(member), None).await?);
        }
        for (member, score) in empty {
            let cooldown = (score - now).max(0.0);
            snapshot
                .empty
                .push(self.key_state(ApiKey::new(member), Some(cooldown)).await?);
        }
        for member in retired {
            snapshot
                .retired
                .push(self.key_state(ApiKey::new(member), None).await?);
        }
        for member in quarantined {
            snapshot
                .quarantined
                .push(self.key_state(ApiKey::new(member), None).await?);
        }
        for key in banned {
            snapshot.banned.push(self.key_state(key, None).await?);
        }
        Ok(snapshot)
    }

    async fn key_state(&self, key: ApiKey, cooldown: Option<f64>) -> Result<KeyState> {
        let daily_count = daily::count(self.store.as_ref(), &key).await?;
        Ok(KeyState {
            key,
            daily_count,
            cooldown_remaining: cooldown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FileCatalog;
    use crate::policy::Limits;
    use coordination::MemoryStore;

    async fn scheduler_with(
        dir: &tempfile::TempDir,
        keys: &[&str],
        default: Limits,
        max_failures: u32,
    ) -> KeyScheduler {
        let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
        let catalog = FileCatalog::load(dir.path().join("keys.json")).await.unwrap();
        let keys: Vec<ApiKey> = keys.iter().map(|k| ApiKey::new(*k)).collect();
        catalog.sync_from_config(&keys).await.unwrap();

        let scheduler = KeyScheduler::new(
            store,
            Arc::new(catalog),
            RateLimitPolicy::uniform(default),
            max_failures,
        );
        scheduler.initialize().await.unwrap();
        scheduler
    }

    #[tokio::test]
    async fn acquire_returns_loaded_key() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_with(&dir, &["k1"], Limits { rpm: 5, rpd: 100 }, 3).await;

        let key = scheduler.acquire("gemini-2.5-flash").await.unwrap();
        assert_eq!(key, ApiKey::new("k1"));
    }

    #[tokio::test]
    async fn empty_pool_is_no_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_with(&dir, &[], Limits { rpm: 5, rpd: 100 }, 3).await;

        let err = scheduler.acquire("m").await.unwrap_err();
        assert!(matches!(err, Error::NoCapacity(_)));
    }

    #[tokio::test]
    async fn rpm_exhaustion_moves_key_to_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_with(&dir, &["k1"], Limits { rpm: 2, rpd: 100 }, 3).await;

        scheduler.acquire("m").await.unwrap();
        scheduler.acquire("m").await.unwrap();

        // Third request: bucket is dry, key files into EMPTY, pool drains
        let err = scheduler.acquire("m").await.unwrap_err();
        assert!(matches!(err, Error::NoCapacity(_)));

        let store = scheduler.store();
        let empty = store.sorted_set_entries(keys::EMPTY_TOKEN_KEYS).await.unwrap();
        assert_eq!(empty.len(), 1);
        assert_eq!(empty[0].0, "k1");
        // Cooldown score lands within 60/rpm seconds of now
        assert!(empty[0].1 <= now_secs() + 30.0 + 1.0);
        assert!(empty[0].1 >= now_secs());
    }

    #[tokio::test]
    async fn acquire_records_daily_use() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_with(&dir, &["k1"], Limits { rpm: 10, rpd: 100 }, 3).await;

        let key = scheduler.acquire("m").await.unwrap();
        scheduler.acquire("m").await.unwrap();
        assert_eq!(daily::count(scheduler.store().as_ref(), &key).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn rpd_exhaustion_retires_key() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_with(&dir, &["k1"], Limits { rpm: 100, rpd: 5 }, 3).await;

        for _ in 0..5 {
            scheduler.acquire("m").await.unwrap();
        }
        // Daily counter is now at the limit; next acquire retires the key
        let err = scheduler.acquire("m").await.unwrap_err();
        assert!(matches!(err, Error::NoCapacity(_)));

        let store = scheduler.store();
        assert!(store
            .set_contains(keys::RETIRED_KEYS, "k1")
            .await
            .unwrap());
        assert!(!store
            .set_contains(keys::FULL_TOKEN_KEYS, "k1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn repeated_server_errors_quarantine_key() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_with(&dir, &["k1"], Limits { rpm: 100, rpd: 100 }, 3).await;
        let key = ApiKey::new("k1");

        for _ in 0..3 {
            scheduler.acquire("m").await.unwrap();
            scheduler
                .release_on_failure(&key, Some(500), "internal error")
                .await
                .unwrap();
        }

        assert!(scheduler
            .store()
            .set_contains(keys::QUARANTINE_KEYS, "k1")
            .await
            .unwrap());
        let err = scheduler.acquire("m").await.unwrap_err();
        assert!(matches!(err, Error::NoCapacity(_)));
    }

    #[tokio::test]
    async fn client_error_does_not_touch_key_state() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_with(&dir, &["k1"], Limits { rpm: 100, rpd: 100 }, 1).await;
        let key = ApiKey::new("k1");

        scheduler.acquire("m").await.unwrap();
        scheduler
            .release_on_failure(&key, Some(400), "bad request")
            .await
            .unwrap();

        assert_eq!(failure::count(scheduler.store().as_ref(), &key).await.unwrap(), 0);
        assert!(scheduler.acquire("m").await.is_ok());
    }

    #[tokio::test]
    async fn ban_signal_removes_key_everywhere() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_with(&dir, &["k1"], Limits { rpm: 100, rpd: 100 }, 3).await;
        let key = ApiKey::new("k1");

        scheduler.acquire("m").await.unwrap();
        scheduler
            .release_on_failure(
                &key,
                Some(403),
                r#"{"error":{"status":"PERMISSION_DENIED","message":"API_KEY_INVALID"}}"#,
            )
            .await
            .unwrap();

        let err = scheduler.acquire("m").await.unwrap_err();
        assert!(matches!(err, Error::NoCapacity(_)));

        let snapshot = scheduler.snapshot().await.unwrap();
        assert!(snapshot.full.is_empty());
        assert_eq!(snapshot.banned.len(), 1);
        assert_eq!(snapshot.banned[0].key, key);
    }

    #[tokio::test]
    async fn reset_restores_quarantined_key() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_with(&dir, &["k1"], Limits { rpm: 100, rpd: 100 }, 1).await;
        let key = ApiKey::new("k1");

        scheduler.acquire("m").await.unwrap();
        scheduler
            .release_on_failure(&key, Some(500), "boom")
            .await
            .unwrap();
        assert!(matches!(
            scheduler.acquire("m").await.unwrap_err(),
            Error::NoCapacity(_)
        ));

        scheduler.reset(&key).await.unwrap();
        assert_eq!(failure::count(scheduler.store().as_ref(), &key).await.unwrap(), 0);
        assert_eq!(daily::count(scheduler.store().as_ref(), &key).await.unwrap(), 0);
        assert_eq!(scheduler.acquire("m").await.unwrap(), key);
    }

    #[tokio::test]
    async fn initialize_preserves_quarantine() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_with(&dir, &["k1", "k2"], Limits { rpm: 100, rpd: 100 }, 1).await;

        scheduler
            .release_on_failure(&ApiKey::new("k1"), Some(500), "boom")
            .await
            .unwrap();
        assert!(scheduler
            .store()
            .set_contains(keys::QUARANTINE_KEYS, "k1")
            .await
            .unwrap());

        // Re-initialize (process restart): quarantine membership survives
        scheduler.initialize().await.unwrap();
        assert!(scheduler
            .store()
            .set_contains(keys::QUARANTINE_KEYS, "k1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn find_by_suffix_locates_catalog_key() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler =
            scheduler_with(&dir, &["key-12345678"], Limits { rpm: 5, rpd: 100 }, 3).await;

        let found = scheduler.find_by_suffix("12345678").await.unwrap();
        assert_eq!(found, Some(ApiKey::new("key-12345678")));
        assert_eq!(scheduler.find_by_suffix("00000000").await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_acquires_drain_single_token_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(
            scheduler_with(&dir, &["k1", "k2"], Limits { rpm: 1, rpd: 100 }, 3).await,
        );

        let (a, b) = tokio::join!(
            {
                let s = scheduler.clone();
                tokio::spawn(async move { s.acquire("m").await })
            },
            {
                let s = scheduler.clone();
                tokio::spawn(async move { s.acquire("m").await })
            }
        );
        let first = a.unwrap().unwrap();
        let second = b.unwrap().unwrap();
        assert_ne!(first, second);

        // Both keys drained their single token and sit in cooldown, due
        // for promotion within 60 seconds
        let empty = scheduler
            .store()
            .sorted_set_entries(keys::EMPTY_TOKEN_KEYS)
            .await
            .unwrap();
        assert_eq!(empty.len(), 2);
        let now = now_secs();
        for (_, score) in empty {
            assert!(score > now - 1.0);
            assert!(score <= now + 60.0 + 1.0);
        }
    }

    #[tokio::test]
    async fn snapshot_reports_all_pools() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler_with(&dir, &["k1", "k2"], Limits { rpm: 1, rpd: 100 }, 3).await;

        // Drain one key so it lands in EMPTY
        scheduler.acquire("m").await.unwrap();

        let snapshot = scheduler.snapshot().await.unwrap();
        assert_eq!(snapshot.total(), 2);
        assert_eq!(snapshot.full.len() + snapshot.empty.len(), 2);
        assert_eq!(snapshot.empty.len(), 1);
        assert!(snapshot.empty[0].cooldown_remaining.unwrap() <= 60.0);
        assert_eq!(snapshot.empty[0].daily_count, 1);
    }
}
