//! Error types for credential refresh

/// Why a refresh cycle failed.
///
/// `Clone` because one outcome is observed by every request waiting on the
/// cycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    /// The refresh handler returned an error.
    #[error("refresh handler failed: {0}")]
    Handler(String),

    /// The refresh handler panicked instead of settling.
    #[error("refresh handler panicked: {0}")]
    Panicked(String),

    /// The refresh task was cancelled before it settled.
    #[error("refresh task aborted before settling")]
    Aborted,
}

/// Result alias for refresh operations.
pub type Result<T> = std::result::Result<T, RefreshError>;
