//! Shared types for the auth-refresh workspace
//!
//! Holds the configuration error type used by every binary and the `Secret`
//! wrapper that keeps access and refresh tokens out of logs.

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
