//! Transport error taxonomy
//!
//! Every failure that reaches a caller is one of these. The variants keep the
//! data auth-refresh handling needs: the upstream response (with its status)
//! and the request configuration to replay.

use crate::request::{RequestConfig, Response};

/// Errors surfaced by `Client::send` and passed to response interceptors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Upstream answered with a non-2xx status.
    #[error("{} {} returned status {}", .0.config.method, .0.config.url, .0.status)]
    Status(Box<Response>),

    /// No response was received (connect failure, timeout, reset).
    #[error("network error calling {}: {}", .config.url, .message)]
    Network {
        config: Box<RequestConfig>,
        message: String,
    },

    /// The request was cancelled before dispatch. Distinct from a server
    /// rejection so retry logic can tell the two apart.
    #[error("request cancelled: {reason}")]
    Cancelled { reason: String },

    /// A credential refresh triggered by this request failed. `original` is
    /// the failure that triggered it.
    #[error("credential refresh failed: {reason}")]
    RefreshFailed {
        reason: String,
        original: Box<TransportError>,
    },

    /// A request interceptor rejected the request.
    #[error("interceptor error: {0}")]
    Interceptor(String),
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// The upstream response, if one was received.
    pub fn response(&self) -> Option<&Response> {
        match self {
            TransportError::Status(response) => Some(response),
            _ => None,
        }
    }

    /// Upstream status code. For `RefreshFailed` this is the status of the
    /// request that triggered the refresh.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status(response) => Some(response.status),
            TransportError::RefreshFailed { original, .. } => original.status(),
            _ => None,
        }
    }

    /// The request this failure belongs to, when known.
    pub fn config(&self) -> Option<&RequestConfig> {
        match self {
            TransportError::Status(response) => Some(&response.config),
            TransportError::Network { config, .. } => Some(config),
            TransportError::RefreshFailed { original, .. } => original.config(),
            TransportError::Cancelled { .. } | TransportError::Interceptor(_) => None,
        }
    }

    /// Take ownership of the request configuration for a replay.
    pub fn into_config(self) -> Option<RequestConfig> {
        match self {
            TransportError::Status(response) => Some(response.config),
            TransportError::Network { config, .. } => Some(*config),
            TransportError::RefreshFailed { original, .. } => original.into_config(),
            TransportError::Cancelled { .. } | TransportError::Interceptor(_) => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled { .. })
    }

    pub fn is_network(&self) -> bool {
        matches!(self, TransportError::Network { .. })
    }
}
