//! Configuration types and loading

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use gemini_pool::{BreakerConfig, Limits, RateLimitPolicy};
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub coordination: CoordinationConfig,
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub breaker: BreakerSettings,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
}

/// Upstream provider settings
#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    /// e.g. `https://generativelanguage.googleapis.com/v1beta`
    pub base_url: String,
    /// End-to-end upstream call timeout, seconds.
    #[serde(default = "default_time_out")]
    pub time_out: u64,
}

/// Which coordination backend holds the shared pool state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationBackend {
    /// Shared Redis; required for multi-replica deployments.
    Redis,
    /// In-process state; single replica only.
    Memory,
}

/// Coordination store settings
#[derive(Debug, Deserialize)]
pub struct CoordinationConfig {
    #[serde(default = "default_backend")]
    pub backend: CoordinationBackend,
    #[serde(default = "default_coordination_url")]
    pub url: String,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            url: default_coordination_url(),
        }
    }
}

/// Key catalog settings
#[derive(Debug, Deserialize)]
pub struct CatalogConfig {
    /// Path of the JSON catalog file.
    pub path: PathBuf,
    /// Keys to import as active on startup (existing records keep their
    /// status).
    #[serde(default)]
    pub keys: Vec<String>,
}

/// Rate-limit and retry settings
#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_rpm")]
    pub default_rpm: u32,
    #[serde(default = "default_rpd")]
    pub default_rpd: u32,
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Informational only; the daily reset always runs on UTC.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// model → [rpm, rpd]
    #[serde(default)]
    pub model_rate_limits: HashMap<String, [u32; 2]>,
    /// key suffix (last 8) → [rpm, rpd]
    #[serde(default)]
    pub key_rate_limits: HashMap<String, [u32; 2]>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_rpm: default_rpm(),
            default_rpd: default_rpd(),
            max_failures: default_max_failures(),
            max_retries: default_max_retries(),
            timezone: default_timezone(),
            model_rate_limits: HashMap::new(),
            key_rate_limits: HashMap::new(),
        }
    }
}

/// Global circuit breaker settings
#[derive(Debug, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub global_failure_threshold: i64,
    #[serde(default = "default_cooldown_seconds")]
    pub global_cooldown_seconds: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            global_failure_threshold: default_failure_threshold(),
            global_cooldown_seconds: default_cooldown_seconds(),
        }
    }
}

fn default_time_out() -> u64 {
    300
}

fn default_backend() -> CoordinationBackend {
    CoordinationBackend::Redis
}

fn default_coordination_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_rpm() -> u32 {
    5
}

fn default_rpd() -> u32 {
    100
}

fn default_max_failures() -> u32 {
    3
}

fn default_max_retries() -> u32 {
    3
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_failure_threshold() -> i64 {
    50
}

fn default_cooldown_seconds() -> u64 {
    60
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config path: CLI flag, then `GEMINI_GATEWAY_CONFIG`,
    /// then `config.toml` in the working directory.
    pub fn resolve_path(cli_override: Option<&str>) -> PathBuf {
        if let Some(path) = cli_override {
            return PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("GEMINI_GATEWAY_CONFIG") {
            return PathBuf::from(path);
        }
        PathBuf::from("config.toml")
    }

    fn validate(&self) -> common::Result<()> {
        if self.upstream.base_url.is_empty() {
            return Err(common::Error::Config("upstream.base_url is empty".into()));
        }
        if self.limits.default_rpm == 0 {
            return Err(common::Error::Config("limits.default_rpm must be > 0".into()));
        }
        if self.limits.max_retries == 0 {
            return Err(common::Error::Config("limits.max_retries must be > 0".into()));
        }
        Ok(())
    }

    /// Upstream base URL without a trailing slash.
    pub fn upstream_base(&self) -> &str {
        self.upstream.base_url.trim_end_matches('/')
    }

    /// Build the rate-limit policy table from the configured overrides.
    pub fn policy(&self) -> RateLimitPolicy {
        let to_limits = |pairs: &HashMap<String, [u32; 2]>| -> HashMap<String, Limits> {
            pairs
                .iter()
                .map(|(name, [rpm, rpd])| (name.clone(), Limits { rpm: *rpm, rpd: *rpd }))
                .collect()
        };
        RateLimitPolicy::new(
            Limits {
                rpm: self.limits.default_rpm,
                rpd: self.limits.default_rpd,
            },
            to_limits(&self.limits.model_rate_limits),
            to_limits(&self.limits.key_rate_limits),
        )
    }

    /// Breaker thresholds as the pool crate's config type.
    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker.global_failure_threshold,
            cooldown_seconds: self.breaker.global_cooldown_seconds,
        }
    }
}
