//! Global circuit breaker
//!
//! System-wide short-circuit over the coordination store: a rolling
//! one-minute count of upstream 5xx across all keys and replicas, and a
//! tripped flag whose TTL is the cooldown. While the flag lives, every
//! proxy request is rejected before touching the pool.

use std::sync::Arc;

use coordination::CoordinationStore;
use metrics::counter;
use tracing::warn;

use crate::error::{Error, Result};
use crate::keys;

/// Breaker thresholds, read from configuration at startup.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Rolling one-minute 5xx count beyond which the breaker trips.
    pub failure_threshold: i64,
    /// Seconds the breaker stays open once tripped.
    pub cooldown_seconds: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 50,
            cooldown_seconds: 60,
        }
    }
}

/// Shared circuit breaker handle.
pub struct CircuitBreaker {
    store: Arc<dyn CoordinationStore>,
    config: BreakerConfig,
}

impl CircuitBreaker {
    pub fn new(store: Arc<dyn CoordinationStore>, config: BreakerConfig) -> Self {
        Self { store, config }
    }

    /// Gate one inbound proxy request.
    ///
    /// Rejects while the tripped flag lives; trips (and rejects) when the
    /// rolling window exceeds the threshold. The flag's TTL is the cooldown,
    /// so recovery is store-side expiry, not an explicit close.
    pub async fn check(&self) -> Result<()> {
        if self.store.exists(keys::GLOBAL_BREAKER_TRIPPED).await? {
            return Err(Error::CircuitOpen(
                "global circuit breaker is open due to high upstream failure rate".into(),
            ));
        }

        let failures = self
            .store
            .get(keys::GLOBAL_FAILURES_MINUTE)
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);

        if failures > self.config.failure_threshold {
            warn!(
                failures,
                threshold = self.config.failure_threshold,
                cooldown_seconds = self.config.cooldown_seconds,
                "tripping global circuit breaker"
            );
            counter!("breaker_tripped_total").increment(1);
            self.store
                .set_with_ttl(
                    keys::GLOBAL_BREAKER_TRIPPED,
                    "1",
                    self.config.cooldown_seconds,
                )
                .await?;
            return Err(Error::CircuitOpen(
                "global circuit breaker has been tripped".into(),
            ));
        }

        Ok(())
    }

    /// Count one observed upstream 5xx into the rolling window.
    pub async fn record_upstream_failure(&self) -> Result<i64> {
        let count = self
            .store
            .incr_with_ttl(keys::GLOBAL_FAILURES_MINUTE, 60)
            .await?;
        Ok(count)
    }
}
