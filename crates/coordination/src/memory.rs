//! In-process backend for the coordination store
//!
//! Used for single-replica deployments and hermetic tests. All state sits
//! behind one `tokio::sync::Mutex`, so a pipeline is trivially atomic: the
//! lock is held across every operation in the group. TTLs are enforced
//! lazily on read.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::RngExt;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::store::{CoordinationStore, StoreFuture, StoreOp};

#[derive(Default)]
struct Inner {
    sets: HashMap<String, HashSet<String>>,
    zsets: HashMap<String, HashMap<String, f64>>,
    hashes: HashMap<String, HashMap<String, String>>,
    strings: HashMap<String, (String, Option<Instant>)>,
}

impl Inner {
    /// Drop a string entry whose TTL has passed.
    fn purge(&mut self, key: &str) {
        let expired = matches!(
            self.strings.get(key),
            Some((_, Some(expires_at))) if Instant::now() >= *expires_at
        );
        if expired {
            self.strings.remove(key);
        }
    }

    fn parse_counter(&self, key: &str) -> Result<i64> {
        match self.strings.get(key) {
            None => Ok(0),
            Some((value, _)) => value.parse::<i64>().map_err(|e| Error::Malformed {
                key: key.to_string(),
                detail: e.to_string(),
            }),
        }
    }

    fn apply(&mut self, op: StoreOp) {
        match op {
            StoreOp::SetAdd { set, members } => {
                self.sets.entry(set).or_default().extend(members);
            }
            StoreOp::SetRemove { set, members } => {
                if let Some(s) = self.sets.get_mut(&set) {
                    for m in &members {
                        s.remove(m);
                    }
                }
            }
            StoreOp::SortedSetAdd { set, entries } => {
                self.zsets.entry(set).or_default().extend(entries);
            }
            StoreOp::SortedSetRemove { set, members } => {
                if let Some(z) = self.zsets.get_mut(&set) {
                    for m in &members {
                        z.remove(m);
                    }
                }
            }
            StoreOp::HashSet { key, fields } => {
                self.hashes.entry(key).or_default().extend(fields);
            }
            StoreOp::Delete { keys } => {
                for key in keys {
                    self.sets.remove(&key);
                    self.zsets.remove(&key);
                    self.hashes.remove(&key);
                    self.strings.remove(&key);
                }
            }
        }
    }
}

/// Coordination store held entirely in process memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CoordinationStore for MemoryStore {
    fn set_add<'a>(&'a self, set: &'a str, members: &'a [String]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner
                .sets
                .entry(set.to_string())
                .or_default()
                .extend(members.iter().cloned());
            Ok(())
        })
    }

    fn set_pop_random<'a>(&'a self, set: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            let Some(s) = inner.sets.get_mut(set) else {
                return Ok(None);
            };
            if s.is_empty() {
                return Ok(None);
            }
            let idx = rand::rng().random_range(0..s.len());
            let member = s.iter().nth(idx).cloned();
            if let Some(ref m) = member {
                s.remove(m);
            }
            Ok(member)
        })
    }

    fn set_remove<'a>(&'a self, set: &'a str, members: &'a [String]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            if let Some(s) = inner.sets.get_mut(set) {
                for m in members {
                    s.remove(m);
                }
            }
            Ok(())
        })
    }

    fn set_members<'a>(&'a self, set: &'a str) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            Ok(inner
                .sets
                .get(set)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default())
        })
    }

    fn set_contains<'a>(&'a self, set: &'a str, member: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            Ok(inner.sets.get(set).is_some_and(|s| s.contains(member)))
        })
    }

    fn sorted_set_add<'a>(
        &'a self,
        set: &'a str,
        member: &'a str,
        score: f64,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner
                .zsets
                .entry(set.to_string())
                .or_default()
                .insert(member.to_string(), score);
            Ok(())
        })
    }

    fn sorted_set_range_by_score<'a>(
        &'a self,
        set: &'a str,
        max: f64,
    ) -> StoreFuture<'a, Vec<String>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            let Some(z) = inner.zsets.get(set) else {
                return Ok(Vec::new());
            };
            let mut matching: Vec<(&String, f64)> =
                z.iter().filter(|(_, s)| **s <= max).map(|(m, s)| (m, *s)).collect();
            matching.sort_by(|a, b| a.1.total_cmp(&b.1));
            Ok(matching.into_iter().map(|(m, _)| m.clone()).collect())
        })
    }

    fn sorted_set_entries<'a>(&'a self, set: &'a str) -> StoreFuture<'a, Vec<(String, f64)>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            let Some(z) = inner.zsets.get(set) else {
                return Ok(Vec::new());
            };
            let mut entries: Vec<(String, f64)> =
                z.iter().map(|(m, s)| (m.clone(), *s)).collect();
            entries.sort_by(|a, b| a.1.total_cmp(&b.1));
            Ok(entries)
        })
    }

    fn hash_get_all<'a>(&'a self, key: &'a str) -> StoreFuture<'a, HashMap<String, String>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            Ok(inner.hashes.get(key).cloned().unwrap_or_default())
        })
    }

    fn hash_set<'a>(
        &'a self,
        key: &'a str,
        fields: &'a [(String, String)],
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner
                .hashes
                .entry(key.to_string())
                .or_default()
                .extend(fields.iter().cloned());
            Ok(())
        })
    }

    fn hash_incr_by_float<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
        delta: f64,
    ) -> StoreFuture<'a, f64> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            let hash = inner.hashes.entry(key.to_string()).or_default();
            let current = match hash.get(field) {
                None => 0.0,
                Some(value) => value.parse::<f64>().map_err(|e| Error::Malformed {
                    key: format!("{key}:{field}"),
                    detail: e.to_string(),
                })?,
            };
            let next = current + delta;
            hash.insert(field.to_string(), next.to_string());
            Ok(next)
        })
    }

    fn incr<'a>(&'a self, key: &'a str) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.purge(key);
            let next = inner.parse_counter(key)? + 1;
            let expires_at = inner.strings.get(key).and_then(|entry| entry.1);
            inner.strings.insert(key.to_string(), (next.to_string(), expires_at));
            Ok(next)
        })
    }

    fn incr_with_ttl<'a>(&'a self, key: &'a str, ttl_secs: u64) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.purge(key);
            let next = inner.parse_counter(key)? + 1;
            let expires_at = Instant::now() + Duration::from_secs(ttl_secs);
            inner
                .strings
                .insert(key.to_string(), (next.to_string(), Some(expires_at)));
            Ok(next)
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.purge(key);
            Ok(inner.strings.get(key).map(|(v, _)| v.clone()))
        })
    }

    fn set_with_ttl<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl_secs: u64,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            let expires_at = Instant::now() + Duration::from_secs(ttl_secs);
            inner
                .strings
                .insert(key.to_string(), (value.to_string(), Some(expires_at)));
            Ok(())
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.purge(key);
            Ok(inner.strings.contains_key(key)
                || inner.sets.contains_key(key)
                || inner.zsets.contains_key(key)
                || inner.hashes.contains_key(key))
        })
    }

    fn delete<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.apply(StoreOp::Delete {
                keys: keys.to_vec(),
            });
            Ok(())
        })
    }

    fn pipeline(&self, ops: Vec<StoreOp>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            for op in ops {
                inner.apply(op);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn pop_random_drains_the_set() {
        let store = MemoryStore::new();
        store.set_add("pool", &members(&["a", "b", "c"])).await.unwrap();

        let mut popped = Vec::new();
        while let Some(m) = store.set_pop_random("pool").await.unwrap() {
            popped.push(m);
        }
        popped.sort();
        assert_eq!(popped, vec!["a", "b", "c"]);
        assert!(store.set_members("pool").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pipeline_moves_membership_in_one_step() {
        let store = MemoryStore::new();
        store.set_add("full", &members(&["k1"])).await.unwrap();

        store
            .pipeline(vec![
                StoreOp::SetRemove {
                    set: "full".into(),
                    members: members(&["k1"]),
                },
                StoreOp::SetAdd {
                    set: "quarantine".into(),
                    members: members(&["k1"]),
                },
            ])
            .await
            .unwrap();

        assert!(!store.set_contains("full", "k1").await.unwrap());
        assert!(store.set_contains("quarantine", "k1").await.unwrap());
    }

    #[tokio::test]
    async fn sorted_set_range_respects_score_bound() {
        let store = MemoryStore::new();
        store.sorted_set_add("cooldown", "early", 10.0).await.unwrap();
        store.sorted_set_add("cooldown", "late", 100.0).await.unwrap();

        let ready = store.sorted_set_range_by_score("cooldown", 50.0).await.unwrap();
        assert_eq!(ready, vec!["early"]);

        let all = store.sorted_set_range_by_score("cooldown", 1000.0).await.unwrap();
        assert_eq!(all, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn counters_increment_and_expire() {
        let store = MemoryStore::new();
        assert_eq!(store.incr_with_ttl("count", 60).await.unwrap(), 1);
        assert_eq!(store.incr_with_ttl("count", 60).await.unwrap(), 2);
        assert_eq!(store.get("count").await.unwrap().as_deref(), Some("2"));

        store.set_with_ttl("flag", "1", 0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!store.exists("flag").await.unwrap());
        assert_eq!(store.get("flag").await.unwrap(), None);
    }

    #[tokio::test]
    async fn incr_preserves_existing_ttl() {
        let store = MemoryStore::new();
        store.incr_with_ttl("count", 1).await.unwrap();
        assert_eq!(store.incr("count").await.unwrap(), 2);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(store.get("count").await.unwrap(), None);
    }

    #[tokio::test]
    async fn hash_incr_by_float_accumulates() {
        let store = MemoryStore::new();
        store
            .hash_set(
                "bucket",
                &[("tokens".to_string(), "2".to_string())],
            )
            .await
            .unwrap();
        let remaining = store.hash_incr_by_float("bucket", "tokens", -1.0).await.unwrap();
        assert_eq!(remaining, 1.0);
        let fields = store.hash_get_all("bucket").await.unwrap();
        assert_eq!(fields.get("tokens").map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn delete_clears_every_namespace() {
        let store = MemoryStore::new();
        store.set_add("k", &members(&["m"])).await.unwrap();
        store.sorted_set_add("z", "m", 1.0).await.unwrap();
        store
            .hash_set("h", &[("f".to_string(), "v".to_string())])
            .await
            .unwrap();
        store.set_with_ttl("s", "v", 60).await.unwrap();

        store
            .delete(&members(&["k", "z", "h", "s"]))
            .await
            .unwrap();
        for key in ["k", "z", "h", "s"] {
            assert!(!store.exists(key).await.unwrap());
        }
    }
}
