//! Auth refresh probe
//!
//! Exercises the auth-refresh coordinator against a real API:
//! 1. Loads TOML config and the OAuth credentials file
//! 2. Fires `concurrency` requests with the stored access token
//! 3. On 401 the coordinator runs one OAuth refresh grant for all of them
//! 4. Logs each outcome, a summary and optionally the metrics exposition

mod config;
mod credentials;
mod error;
mod metrics;
mod probe;
mod token;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::credentials::CredentialStore;

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

    info!("starting refresh-probe");

    // Install before any metrics are emitted
    let prometheus = metrics::install_recorder().context("failed to install metrics recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        url = %config.target.url,
        concurrency = config.target.concurrency,
        token_endpoint = %config.oauth.token_endpoint,
        status_codes = ?config.refresh.status_codes,
        pause_client = config.refresh.pauses_client(),
        "configuration loaded"
    );

    let store = CredentialStore::load(config.oauth.credentials_file.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load credentials from {}",
                config.oauth.credentials_file.display()
            )
        })?;
    if let Some(refresh) = config.oauth.refresh_token.take() {
        info!("using refresh token from REFRESH_TOKEN");
        store.set_refresh_token(refresh);
    }

    let store = Arc::new(store);
    let summary = probe::run(&config, store.clone())
        .await
        .context("probe run failed")?;

    info!(
        ok = summary.ok,
        failed = summary.failed,
        refresh_failed = summary.refresh_failed,
        cancelled = summary.cancelled,
        access_expires = store.expires(),
        "probe finished"
    );

    if config.print_metrics {
        info!(metrics = %prometheus.render(), "metrics");
    }

    anyhow::ensure!(
        summary.all_ok(),
        "{} of {} probe requests failed",
        summary.total() - summary.ok,
        summary.total()
    );
    Ok(())
}
