//! Probe error types

use std::time::Duration;
use thiserror::Error;

/// Errors raised while rotating or persisting OAuth credentials.
#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// Refresh token revoked or rejected by the token endpoint
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("token refresh timed out after {0:?}")]
    Timeout(Duration),

    #[error("credential file error: {0}")]
    Io(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),
}

/// Result alias using probe Error
pub type Result<T> = std::result::Result<T, Error>;
