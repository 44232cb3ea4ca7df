//! Durable key catalog
//!
//! The catalog is the durable administrative record of every upstream key:
//! which are active, which were limited by quarantine, and which the
//! upstream banned outright. The scheduler loads active keys from it at
//! startup and writes status changes back; catalog write failures never
//! block the request path.
//!
//! `FileCatalog` is the shipped implementation: a JSON file with atomic
//! temp-file + rename writes and 0600 permissions (it holds full key
//! material). A relational catalog can be swapped in behind the same trait.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use common::ApiKey;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Durable administrative status of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    /// Quarantined by the failure tracker; reversible by operator reset.
    Limited,
    /// Banned by an upstream signal; terminal without operator reset.
    Banned,
}

/// Boxed future alias for catalog operations.
pub type CatalogFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Abstraction over the durable key catalog.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Catalog>`).
pub trait Catalog: Send + Sync {
    /// All keys with their durable status (startup load).
    fn list_keys(&self) -> CatalogFuture<'_, Vec<(ApiKey, KeyStatus)>>;

    /// Mark a key limited (quarantine threshold reached).
    fn mark_limited<'a>(&'a self, key: &'a ApiKey) -> CatalogFuture<'a, ()>;

    /// Mark a key banned (upstream ban signal).
    fn mark_banned<'a>(&'a self, key: &'a ApiKey) -> CatalogFuture<'a, ()>;

    /// Restore a key to active (operator reset).
    fn reset_active<'a>(&'a self, key: &'a ApiKey) -> CatalogFuture<'a, ()>;

    /// Currently banned keys (status snapshot).
    fn banned_keys(&self) -> CatalogFuture<'_, Vec<ApiKey>>;
}

/// One catalog record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyRecord {
    status: KeyStatus,
    /// Unix seconds of the ban, present only for banned keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    banned_at: Option<u64>,
}

/// JSON-file catalog. A tokio `Mutex` serializes writers; reads clone the
/// in-memory state under a brief lock.
pub struct FileCatalog {
    path: PathBuf,
    state: Mutex<HashMap<String, KeyRecord>>,
}

impl FileCatalog {
    /// Load the catalog from the given path, creating an empty file if it
    /// does not exist yet.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Catalog(format!("reading catalog file: {e}")))?;
            let records: HashMap<String, KeyRecord> = serde_json::from_str(&contents)
                .map_err(|e| Error::Catalog(format!("parsing catalog file: {e}")))?;
            info!(path = %path.display(), keys = records.len(), "loaded key catalog");
            records
        } else {
            info!(path = %path.display(), "catalog file not found, starting empty");
            let records = HashMap::new();
            write_atomic(&path, &records).await?;
            records
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Insert configured keys that are not in the catalog yet, as active.
    ///
    /// Existing records keep their status; a banned key stays banned even
    /// if it is still listed in the configuration.
    pub async fn sync_from_config(&self, keys: &[ApiKey]) -> Result<usize> {
        let mut state = self.state.lock().await;
        let mut added = 0;
        for key in keys {
            if !state.contains_key(key.expose()) {
                state.insert(
                    key.expose().to_string(),
                    KeyRecord {
                        status: KeyStatus::Active,
                        banned_at: None,
                    },
                );
                added += 1;
            }
        }
        if added > 0 {
            write_atomic(&self.path, &state).await?;
            info!(added, "imported new keys from configuration");
        }
        Ok(added)
    }

    async fn set_status(&self, key: &ApiKey, status: KeyStatus) -> Result<()> {
        let mut state = self.state.lock().await;
        let banned_at = match status {
            KeyStatus::Banned => Some(
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs(),
            ),
            _ => None,
        };
        state.insert(key.expose().to_string(), KeyRecord { status, banned_at });
        debug!(key = %key, status = ?status, "catalog status updated");
        write_atomic(&self.path, &state).await
    }
}

impl Catalog for FileCatalog {
    fn list_keys(&self) -> CatalogFuture<'_, Vec<(ApiKey, KeyStatus)>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state
                .iter()
                .map(|(key, record)| (ApiKey::new(key.clone()), record.status))
                .collect())
        })
    }

    fn mark_limited<'a>(&'a self, key: &'a ApiKey) -> CatalogFuture<'a, ()> {
        Box::pin(self.set_status(key, KeyStatus::Limited))
    }

    fn mark_banned<'a>(&'a self, key: &'a ApiKey) -> CatalogFuture<'a, ()> {
        Box::pin(self.set_status(key, KeyStatus::Banned))
    }

    fn reset_active<'a>(&'a self, key: &'a ApiKey) -> CatalogFuture<'a, ()> {
        Box::pin(self.set_status(key, KeyStatus::Active))
    }

    fn banned_keys(&self) -> CatalogFuture<'_, Vec<ApiKey>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state
                .iter()
                .filter(|(_, record)| record.status == KeyStatus::Banned)
                .map(|(key, _)| ApiKey::new(key.clone()))
                .collect())
        })
    }
}

/// Write the catalog atomically: temp file in the same directory, then
/// rename over the target. 0600 since the file holds full key material.
async fn write_atomic(path: &Path, records: &HashMap<String, KeyRecord>) -> Result<()> {
    let json = serde_json::to_string_pretty(records)
        .map_err(|e| Error::Catalog(format!("serializing catalog: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Catalog("catalog path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(".catalog.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Catalog(format!("writing temp catalog file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Catalog(format!("setting catalog file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Catalog(format!("renaming temp catalog file: {e}")))?;
    Ok(())
}
