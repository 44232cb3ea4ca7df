//! Upstream API key wrapper
//!
//! An `ApiKey` is an opaque secret string authenticating calls to the
//! upstream provider. Debug/Display render only the masked tail so full key
//! material never reaches logs; the buffer is zeroized on drop. Rate-limit
//! policy overrides address keys by their last-8 suffix, log lines by the
//! last-4 mask.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Opaque upstream credential.
///
/// Serializes as the plain key string (the catalog file is the durable home
/// of key material and is written with 0600 permissions); everything
/// user-facing goes through `masked()`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw key string, for upstream requests and store membership.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Last-8 suffix used to address per-key rate-limit overrides and
    /// operator endpoints without putting full key material on the wire.
    pub fn suffix(&self) -> &str {
        let n = self.0.len();
        &self.0[n.saturating_sub(8)..]
    }

    /// Masked form for logs and status snapshots: `...` + last 4 chars.
    pub fn masked(&self) -> String {
        let n = self.0.len();
        format!("...{}", &self.0[n.saturating_sub(4)..])
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey({})", self.masked())
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.masked())
    }
}

impl PartialEq for ApiKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for ApiKey {}

impl Hash for ApiKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl From<String> for ApiKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ApiKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Drop for ApiKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}
