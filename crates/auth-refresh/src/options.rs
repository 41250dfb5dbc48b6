//! Refresh configuration
//!
//! `RefreshOptions` is plain data and deserializes from a TOML/JSON table
//! with every field optional. `RefreshHooks` carries the closure-valued
//! options that cannot come from a config file.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use transport::{RequestConfig, TransportError};

/// Status codes that start a refresh when no `should_refresh` hook is set.
pub const DEFAULT_STATUS_CODES: &[u16] = &[401];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RefreshOptions {
    /// Upstream statuses that qualify a failure for refresh.
    pub status_codes: Vec<u16>,
    /// Mark the triggering client as paused while the refresh runs, so
    /// further failures on it are returned as-is instead of joining.
    pub pause_client_during_refresh: bool,
    /// Deprecated inverse of `pause_client_during_refresh`. When set it wins.
    pub skip_queue_while_refreshing: Option<bool>,
    /// Also treat network errors (no response at all) as refresh triggers.
    pub intercept_network_error: bool,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            status_codes: DEFAULT_STATUS_CODES.to_vec(),
            pause_client_during_refresh: true,
            skip_queue_while_refreshing: None,
            intercept_network_error: false,
        }
    }
}

impl RefreshOptions {
    /// Effective pause flag after resolving the deprecated alias.
    pub fn pauses_client(&self) -> bool {
        match self.skip_queue_while_refreshing {
            Some(skip) => !skip,
            None => self.pause_client_during_refresh,
        }
    }

    pub fn triggers_on(&self, status: u16) -> bool {
        self.status_codes.contains(&status)
    }
}

type ShouldRefresh = Arc<dyn Fn(&TransportError) -> bool + Send + Sync>;
type OnRetry = Arc<dyn Fn(RequestConfig) -> RequestConfig + Send + Sync>;

/// Closure-valued options.
#[derive(Clone, Default)]
pub struct RefreshHooks {
    /// Replaces the `status_codes` membership test.
    pub should_refresh: Option<ShouldRefresh>,
    /// Rewrites a request before it is replayed or released from the gate.
    pub on_retry: Option<OnRetry>,
}

impl RefreshHooks {
    pub(crate) fn apply_retry(&self, config: RequestConfig) -> RequestConfig {
        match &self.on_retry {
            Some(on_retry) => on_retry(config),
            None => config,
        }
    }
}

impl fmt::Debug for RefreshHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshHooks")
            .field("should_refresh", &self.should_refresh.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}
