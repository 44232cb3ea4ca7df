//! Gemini gateway
//!
//! Single-binary service that:
//! 1. Loads the key catalog and seeds the shared credential pool
//! 2. Listens for native Gemini generate requests
//! 3. Multiplexes them across the pool under per-key RPM/RPD quotas
//! 4. Proxies to the upstream provider with retries and a global breaker

mod admin;
mod config;
mod error;
mod metrics;
mod proxy;

use anyhow::{Context, Result};
use common::ApiKey;
use coordination::{CoordinationStore, MemoryStore, RedisStore};
use gemini_pool::{CircuitBreaker, FileCatalog, KeyScheduler, activation};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, CoordinationBackend};
use crate::proxy::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting gemini-gateway");

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        upstream = config.upstream_base(),
        time_out = config.upstream.time_out,
        max_retries = config.limits.max_retries,
        timezone = %config.limits.timezone,
        "configuration loaded"
    );

    let prometheus = metrics::install_recorder();

    let store: Arc<dyn CoordinationStore> = match config.coordination.backend {
        CoordinationBackend::Redis => Arc::new(
            RedisStore::connect(&config.coordination.url)
                .await
                .with_context(|| {
                    format!("failed to connect to redis at {}", config.coordination.url)
                })?,
        ),
        CoordinationBackend::Memory => {
            info!("using in-process coordination store (single replica)");
            Arc::new(MemoryStore::new())
        }
    };

    let catalog = FileCatalog::load(config.catalog.path.clone())
        .await
        .context("failed to load key catalog")?;
    let configured_keys: Vec<ApiKey> = config
        .catalog
        .keys
        .iter()
        .map(|k| ApiKey::new(k.clone()))
        .collect();
    catalog
        .sync_from_config(&configured_keys)
        .await
        .context("failed to import configured keys")?;

    let scheduler = Arc::new(KeyScheduler::new(
        store.clone(),
        Arc::new(catalog),
        config.policy(),
        config.limits.max_failures,
    ));
    let loaded = scheduler
        .initialize()
        .await
        .context("failed to initialize key pool")?;
    info!(keys = loaded, "key pool initialized");

    let breaker = Arc::new(CircuitBreaker::new(store.clone(), config.breaker_config()));

    let _activation_task =
        activation::spawn_activation_task(store.clone(), Duration::from_secs(1));
    let _daily_reset_task = activation::spawn_daily_reset_task(store.clone());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.upstream.time_out))
        .build()
        .context("failed to build upstream client")?;

    let state = AppState {
        scheduler,
        breaker,
        client,
        upstream_base: config.upstream_base().to_string(),
        max_retries: config.limits.max_retries,
        started_at: Instant::now(),
        prometheus,
    };

    let app = proxy::build_router(state);

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;

    info!(addr = %config.server.listen_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
