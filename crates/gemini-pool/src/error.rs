//! Error taxonomy surfaced by the credential pool

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Every key is currently rate-limited, retired, quarantined or banned.
    #[error("no capacity: {0}")]
    NoCapacity(String),

    /// The global circuit breaker is open.
    #[error("circuit breaker open: {0}")]
    CircuitOpen(String),

    /// Upstream 4xx (non-429, non-ban): passed through to the caller
    /// unchanged, never retried, never penalizes the key.
    #[error("upstream client error (status {status})")]
    ClientError { status: u16, body: String },

    /// All retry attempts spent on 429/5xx/transport failures.
    #[error("upstream unavailable after {attempts} attempts (last status: {last_status:?})")]
    UpstreamUnavailable {
        attempts: u32,
        last_status: Option<u16>,
    },

    #[error("coordination store error: {0}")]
    Store(#[from] coordination::Error),

    #[error("catalog error: {0}")]
    Catalog(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
