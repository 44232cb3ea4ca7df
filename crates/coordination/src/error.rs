//! Error types for coordination store operations

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("malformed value at {key}: {detail}")]
    Malformed { key: String, detail: String },
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;
