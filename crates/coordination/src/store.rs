//! The `CoordinationStore` trait and atomic pipeline operations
//!
//! Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
//! (`Arc<dyn CoordinationStore>`), so the scheduler can be wired to either
//! backend at startup.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::error::Result;

/// Boxed future alias used by all trait methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// One operation inside an atomic pipeline.
///
/// Pipelines carry only write operations: every cross-set membership change
/// (the four-pool invariant in the scheduler) must land in a single pipeline
/// so no observer sees a key in two pools at once.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    SetAdd { set: String, members: Vec<String> },
    SetRemove { set: String, members: Vec<String> },
    SortedSetAdd { set: String, entries: Vec<(String, f64)> },
    SortedSetRemove { set: String, members: Vec<String> },
    HashSet { key: String, fields: Vec<(String, String)> },
    Delete { keys: Vec<String> },
}

/// Abstraction over the shared coordination store.
///
/// All operations are non-blocking from the caller's scheduling model; the
/// redis backend suspends on the wire, the memory backend on a local mutex.
pub trait CoordinationStore: Send + Sync {
    /// `SADD set members...`
    fn set_add<'a>(&'a self, set: &'a str, members: &'a [String]) -> StoreFuture<'a, ()>;

    /// `SPOP set` — atomically remove and return one uniformly random member.
    fn set_pop_random<'a>(&'a self, set: &'a str) -> StoreFuture<'a, Option<String>>;

    /// `SREM set members...`
    fn set_remove<'a>(&'a self, set: &'a str, members: &'a [String]) -> StoreFuture<'a, ()>;

    /// `SMEMBERS set`
    fn set_members<'a>(&'a self, set: &'a str) -> StoreFuture<'a, Vec<String>>;

    /// `SISMEMBER set member`
    fn set_contains<'a>(&'a self, set: &'a str, member: &'a str) -> StoreFuture<'a, bool>;

    /// `ZADD set score member`
    fn sorted_set_add<'a>(&'a self, set: &'a str, member: &'a str, score: f64)
    -> StoreFuture<'a, ()>;

    /// `ZRANGEBYSCORE set -inf max`
    fn sorted_set_range_by_score<'a>(&'a self, set: &'a str, max: f64)
    -> StoreFuture<'a, Vec<String>>;

    /// `ZRANGE set 0 -1 WITHSCORES`
    fn sorted_set_entries<'a>(&'a self, set: &'a str) -> StoreFuture<'a, Vec<(String, f64)>>;

    /// `HGETALL key`
    fn hash_get_all<'a>(&'a self, key: &'a str) -> StoreFuture<'a, HashMap<String, String>>;

    /// `HSET key field value ...` — one unconditional multi-field write.
    fn hash_set<'a>(&'a self, key: &'a str, fields: &'a [(String, String)])
    -> StoreFuture<'a, ()>;

    /// `HINCRBYFLOAT key field delta`
    fn hash_incr_by_float<'a>(
        &'a self,
        key: &'a str,
        field: &'a str,
        delta: f64,
    ) -> StoreFuture<'a, f64>;

    /// `INCR key` — returns the post-increment value. Preserves any TTL.
    fn incr<'a>(&'a self, key: &'a str) -> StoreFuture<'a, i64>;

    /// Atomic `INCR key` + `EXPIRE key ttl`; returns the post-increment value.
    fn incr_with_ttl<'a>(&'a self, key: &'a str, ttl_secs: u64) -> StoreFuture<'a, i64>;

    /// `GET key`
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    /// `SET key value EX ttl`
    fn set_with_ttl<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl_secs: u64,
    ) -> StoreFuture<'a, ()>;

    /// `EXISTS key`
    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool>;

    /// `DEL keys...`
    fn delete<'a>(&'a self, keys: &'a [String]) -> StoreFuture<'a, ()>;

    /// Execute a group of write operations atomically (`MULTI`/`EXEC`).
    fn pipeline(&self, ops: Vec<StoreOp>) -> StoreFuture<'_, ()>;
}
