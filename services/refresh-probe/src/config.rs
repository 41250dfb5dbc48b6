//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The refresh token is read from the credentials file, or from the
//! REFRESH_TOKEN env var when set, never from the TOML itself.

use auth_refresh::RefreshOptions;
use common::Secret;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Render the Prometheus exposition text at the end of a run
    #[serde(default)]
    pub print_metrics: bool,
    pub target: TargetConfig,
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub refresh: RefreshOptions,
}

/// Protected endpoint to probe
#[derive(Debug, Deserialize)]
pub struct TargetConfig {
    pub url: String,
    /// Requests fired at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Bounds each request and each token refresh
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// OAuth refresh grant settings
#[derive(Debug, Deserialize)]
pub struct OAuthConfig {
    pub token_endpoint: String,
    pub client_id: String,
    pub credentials_file: PathBuf,
    /// REFRESH_TOKEN env var, overrides the refresh token in `credentials_file`
    #[serde(skip)]
    pub refresh_token: Option<Secret<String>>,
}

fn default_concurrency() -> usize {
    4
}

fn default_timeout() -> u64 {
    30
}

fn require_http(field: &str, value: &str) -> common::Result<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        return Ok(());
    }
    Err(common::Error::Config(format!(
        "{field} must start with http:// or https://, got: {value}"
    )))
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        require_http("target.url", &config.target.url)?;
        require_http("oauth.token_endpoint", &config.oauth.token_endpoint)?;

        if config.target.concurrency == 0 {
            return Err(common::Error::Config(
                "concurrency must be greater than 0".into(),
            ));
        }

        if config.target.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.oauth.client_id.trim().is_empty() {
            return Err(common::Error::Config("client_id must not be empty".into()));
        }

        if config.refresh.status_codes.is_empty() {
            return Err(common::Error::Config(
                "refresh.status_codes must list at least one status".into(),
            ));
        }
        if let Some(code) = config
            .refresh
            .status_codes
            .iter()
            .find(|c| !(100..=599).contains(*c))
        {
            return Err(common::Error::Config(format!(
                "refresh.status_codes contains invalid HTTP status {code}"
            )));
        }

        if let Ok(token) = std::env::var("REFRESH_TOKEN") {
            let token = token.trim().to_owned();
            if !token.is_empty() {
                config.oauth.refresh_token = Some(Secret::new(token));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("refresh-probe.toml")
    }
}
