//! Release Mirror - caching mirror for release artifacts
//!
//! Fetches each mirrored file from its upstream once, no matter how many
//! clients ask for it at the same time, and serves every later request from
//! the local copy.

mod config;
mod dashboard;
mod error;
mod resolver;
mod routing;
mod server;
mod types;

use crate::config::Config;
use crate::error::{MirrorError, Result};
use crate::server::{start_server, ServerState, SharedState};
use artifact_cache::{spawn_sweeper, CacheEngine, ContentStore, HttpFetcher, ProgressRegistry};
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env()
        .add_directive("release_mirror=info".parse()?)
        .add_directive("artifact_cache=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting Release Mirror...");

    let config = Config::parse();
    info!("Port: {}", config.port);
    info!("Data dir: {:?}", config.data_dir);
    info!("Retention: {} seconds", config.retention_secs);
    let rules = config.rules();
    for rule in &rules {
        info!("Mirror: {}", rule);
    }

    let store = ContentStore::new(config.data_dir.clone());
    store.init().await?;

    let progress = ProgressRegistry::new();
    let mut fetcher = HttpFetcher::with_config(config.fetcher_config(), progress.clone())?;
    if let Some(proxy) = resolver::from_setting(&config.proxy) {
        info!("Upstream proxy: {}", config.proxy);
        fetcher = fetcher.with_proxy(proxy);
    }

    let engine = CacheEngine::new(store.clone(), Arc::new(fetcher));
    let sweeper = spawn_sweeper(store, config.retention(), config.sweep_interval());

    let state: SharedState = Arc::new(ServerState::new(engine, progress, rules));

    // Start HTTP server (blocking until shutdown)
    start_server(state, config.port)
        .await
        .map_err(|e| MirrorError::Config(format!("Server error: {}", e)))?;

    sweeper.abort();
    Ok(())
}
