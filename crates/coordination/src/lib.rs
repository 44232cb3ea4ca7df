//! Coordination store adapter
//!
//! Typed façade over the shared key/value store that holds all cross-replica
//! scheduler state: plain sets for key-pool membership, a sorted set for
//! cooldown scores, hashes for token buckets, and TTL'd counters for daily
//! quotas and the circuit breaker window.
//!
//! Two backends implement the same `CoordinationStore` trait:
//! - `RedisStore` — the multi-process deployment backend; cross-set
//!   membership changes are submitted as `MULTI`/`EXEC` pipelines.
//! - `MemoryStore` — single-replica deployments and hermetic tests; the
//!   whole pipeline applies under one lock.

pub mod error;
pub mod memory;
pub mod redis;
pub mod store;

pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use self::redis::RedisStore;
pub use store::{CoordinationStore, StoreFuture, StoreOp};
