//! Coordination-store key layout
//!
//! These names are shared by every replica and the activation worker; they
//! are part of the deployment's wire contract and must not drift.

use common::ApiKey;

/// Set of keys with available RPM tokens.
pub const FULL_TOKEN_KEYS: &str = "gemini:full_token_keys";

/// Sorted set of keys with a drained bucket; score is the unix time at
/// which the next token becomes available.
pub const EMPTY_TOKEN_KEYS: &str = "gemini:empty_token_keys";

/// Set of keys that hit their RPD limit for the day.
pub const RETIRED_KEYS: &str = "gemini:retired_keys";

/// Set of keys that failed too many times for non-rate-limit reasons.
pub const QUARANTINE_KEYS: &str = "gemini:quarantine_keys";

/// Flag set (with TTL) while the global circuit breaker is open.
pub const GLOBAL_BREAKER_TRIPPED: &str = "global_breaker_tripped";

/// Rolling one-minute count of upstream 5xx across all keys.
pub const GLOBAL_FAILURES_MINUTE: &str = "global_gemini_failures_minute";

/// `key:{key}:bucket` — hash `{tokens, last_refill}`.
pub fn bucket_key(key: &ApiKey) -> String {
    format!("key:{}:bucket", key.expose())
}

/// `key:{key}:daily_count` — integer expiring at the next UTC midnight.
pub fn daily_count_key(key: &ApiKey) -> String {
    format!("key:{}:daily_count", key.expose())
}

/// `key:{key}:failures` — non-rate-limit failure counter.
pub fn failures_key(key: &ApiKey) -> String {
    format!("key:{}:failures", key.expose())
}
