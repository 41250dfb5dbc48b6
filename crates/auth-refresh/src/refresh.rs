//! Single-flight credential refresh
//!
//! The first qualifying failure on a client starts the refresh handler on its
//! own task and stores a shared handle to the outcome. Every later failure
//! and every gated request awaits a clone of that handle, so N triggers
//! produce exactly one handler call.
//!
//! Settlement order: handler finishes → teardown clears the client's state →
//! the shared handle resolves. Waiters therefore never observe a half-torn-down
//! cycle, and a failure arriving after they wake starts a fresh refresh.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::Shared;
use tracing::{debug, info, warn};
use transport::TransportError;

use crate::error::{RefreshError, Result};
use crate::state::{CoordinationState, Teardown};

/// Shared outcome of one refresh cycle.
pub(crate) type RefreshHandle = Shared<Pin<Box<dyn Future<Output = Result<()>> + Send>>>;

/// Obtains fresh credentials after an authentication failure.
///
/// Implementations typically call a token endpoint and store the new access
/// token where a request interceptor will pick it up. The future must settle;
/// a panic is reported as a contract violation and fails the cycle.
pub trait RefreshHandler: Send + Sync + 'static {
    fn refresh<'a>(
        &'a self,
        error: &'a TransportError,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Async closures: `|error| async move { ... }`.
impl<F, Fut, E> RefreshHandler for F
where
    F: Fn(TransportError) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    E: fmt::Display,
{
    fn refresh<'a>(
        &'a self,
        error: &'a TransportError,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        let pending = self(error.clone());
        Box::pin(async move {
            pending
                .await
                .map_err(|e| RefreshError::Handler(e.to_string()))
        })
    }
}

/// Return the client's in-flight refresh, starting one if there is none.
///
/// Must be called with the registry locked; `teardown` is only used when a
/// new cycle starts.
pub(crate) fn start_or_join(
    state: &mut CoordinationState,
    error: &TransportError,
    handler: &Arc<dyn RefreshHandler>,
    teardown: Teardown,
) -> RefreshHandle {
    if let Some(existing) = &state.refresh {
        debug!(cycle = state.cycle_id, "joining in-flight refresh");
        return existing.clone();
    }

    state.cycle += 1;
    let cycle = teardown.claim_cycle();
    state.cycle_id = cycle;
    info!(cycle, status = ?error.status(), "starting credential refresh");
    metrics::counter!("auth_refresh_started_total").increment(1);

    let handler = Arc::clone(handler);
    let trigger = error.clone();
    let attempt = tokio::spawn(async move { handler.refresh(&trigger).await });

    let settled = tokio::spawn(async move {
        let outcome = match attempt.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                warn!(cycle, panic = %message, "refresh handler panicked instead of settling");
                Err(RefreshError::Panicked(message))
            }
            Err(_) => {
                warn!(cycle, "refresh handler task was cancelled before settling");
                Err(RefreshError::Aborted)
            }
        };

        match &outcome {
            Ok(()) => info!(cycle, "credential refresh succeeded"),
            Err(e) => warn!(cycle, error = %e, "credential refresh failed"),
        }
        let label = if outcome.is_ok() { "success" } else { "failure" };
        metrics::counter!("auth_refresh_settled_total", "outcome" => label).increment(1);

        teardown.run(cycle);
        outcome
    });

    let handle: Pin<Box<dyn Future<Output = Result<()>> + Send>> = Box::pin(async move {
        settled.await.unwrap_or_else(|e| {
            if e.is_panic() {
                Err(RefreshError::Panicked(panic_message(e.into_panic())))
            } else {
                Err(RefreshError::Aborted)
            }
        })
    });
    let handle = handle.shared();
    state.refresh = Some(handle.clone());
    handle
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("non-string panic payload")
    }
}
