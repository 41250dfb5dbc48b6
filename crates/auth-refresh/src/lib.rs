//! Credential refresh coordination for interceptable HTTP clients
//!
//! Installs onto any [`transport::Transport`] and turns authentication
//! failures into a single coordinated refresh:
//!
//! 1. `classifier` decides whether a failure qualifies
//! 2. `refresh` starts one refresh per client or joins the in-flight one
//! 3. `gate` holds new requests on the client until the refresh settles
//! 4. `state` tracks the per-client lifecycle and tears it down on settle
//! 5. `coordinator` ties the pieces together and replays the failed request
//!
//! ```ignore
//! let client = Arc::new(Client::new(reqwest::Client::new()));
//! let installation = AuthRefresh::builder(|_error| async { rotate_tokens().await })
//!     .options(RefreshOptions::default())
//!     .install(&client);
//! ```

pub mod classifier;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod options;
pub mod refresh;
pub mod state;

pub use classifier::should_refresh;
pub use coordinator::{AuthRefresh, AuthRefreshBuilder, Installation};
pub use error::{RefreshError, Result};
pub use gate::BLOCKED_BY_FAILED_REFRESH;
pub use options::{DEFAULT_STATUS_CODES, RefreshHooks, RefreshOptions};
pub use refresh::RefreshHandler;
pub use state::{CoordinationState, RefreshRegistry, StateSnapshot};
