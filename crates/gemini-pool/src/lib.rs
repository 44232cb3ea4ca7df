//! Credential pool for upstream Gemini API keys
//!
//! Multiplexes traffic across a pool of upstream API keys under per-key
//! RPM/RPD quotas. All pool state lives in the coordination store so every
//! replica shares one view; a key is always in exactly one of four pools:
//!
//! - `HAS_TOKENS` — bucket has at least one token, eligible for selection
//! - `EMPTY` — bucket drained; sorted by the time the next token arrives
//! - `RETIRED` — daily quota spent; restored by the nightly reset job
//! - `QUARANTINED` — failed too often; restored only by operator reset
//!
//! plus the terminal `BANNED` status, which lives in the catalog.
//!
//! Key lifecycle:
//! 1. Startup loads catalog-active keys into `HAS_TOKENS` with full buckets
//! 2. `KeyScheduler::acquire` pops a uniformly random key, enforces RPD,
//!    then consumes one bucket token
//! 3. A drained bucket files the key into `EMPTY`; the activation worker
//!    promotes it back once the refill time arrives
//! 4. Non-rate-limit failures count toward quarantine; upstream ban signals
//!    mark the key banned in the catalog
//! 5. The retry driver loops acquire → upstream call → classify until
//!    success, a client error, or the retry budget is spent

pub mod activation;
pub mod breaker;
pub mod bucket;
pub mod catalog;
pub mod daily;
pub mod error;
pub mod failure;
pub mod keys;
pub mod policy;
pub mod retry;
pub mod scheduler;
mod time;

pub use breaker::{BreakerConfig, CircuitBreaker};
pub use catalog::{Catalog, FileCatalog, KeyStatus};
pub use error::{Error, Result};
pub use policy::{Limits, RateLimitPolicy};
pub use retry::{AttemptFailure, FailureKind, classify, run_with_retries};
pub use scheduler::{KeyScheduler, KeyState, PoolSnapshot};
