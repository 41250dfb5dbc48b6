//! Request queue gate
//!
//! While a refresh is in flight, every outgoing request on the client waits
//! on the refresh handle. Success releases it (through `on_retry`, if set);
//! failure cancels it with `TransportError::Cancelled`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;
use transport::{ClientId, InterceptorId, RequestConfig, RequestInterceptor, Transport, TransportError};

use crate::options::RefreshHooks;
use crate::refresh::RefreshHandle;
use crate::state::CoordinationState;

/// Reason carried by requests cancelled because the refresh failed.
pub const BLOCKED_BY_FAILED_REFRESH: &str = "blocked by failed credential refresh";

struct QueueGate {
    client_id: ClientId,
    refresh: RefreshHandle,
    hooks: RefreshHooks,
}

impl RequestInterceptor for QueueGate {
    fn intercept(
        &self,
        config: RequestConfig,
    ) -> Pin<Box<dyn Future<Output = transport::Result<RequestConfig>> + Send + '_>> {
        Box::pin(async move {
            metrics::counter!("auth_refresh_gated_requests_total").increment(1);
            debug!(client_id = %self.client_id, url = %config.url, "request waiting on credential refresh");

            match self.refresh.clone().await {
                Ok(()) => Ok(self.hooks.apply_retry(config)),
                Err(e) => {
                    debug!(client_id = %self.client_id, url = %config.url, error = %e, "cancelling gated request");
                    Err(TransportError::Cancelled {
                        reason: format!("{BLOCKED_BY_FAILED_REFRESH}: {e}"),
                    })
                }
            }
        })
    }
}

/// Install the gate for the current cycle unless one is already installed.
///
/// Returns the gate's interceptor id either way.
pub(crate) fn install(
    state: &mut CoordinationState,
    transport: &dyn Transport,
    refresh: RefreshHandle,
    hooks: &RefreshHooks,
) -> InterceptorId {
    if let Some(existing) = state.gate_id {
        return existing;
    }

    let client_id = transport.id();
    let id = transport.add_request_interceptor(Arc::new(QueueGate {
        client_id,
        refresh,
        hooks: hooks.clone(),
    }));
    debug!(%client_id, gate = %id, "request gate installed");
    state.gate_id = Some(id);
    id
}
