//! Auth-refresh orchestration
//!
//! `AuthRefresh` is a response interceptor. On a qualifying failure it takes
//! the registry lock once and, without suspending, pauses the client, starts
//! or joins the refresh, and installs the request gate. It then waits for the
//! refresh: success replays the failed request with `skip_auth_refresh` set,
//! failure returns `TransportError::RefreshFailed` wrapping the original error.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use tracing::{debug, info, warn};
use transport::{
    ClientId, InterceptorId, RequestConfig, Response, ResponseInterceptor, Transport,
    TransportError,
};

use crate::classifier;
use crate::gate;
use crate::options::{RefreshHooks, RefreshOptions};
use crate::refresh::{self, RefreshHandle, RefreshHandler};
use crate::state::{RefreshRegistry, Teardown};

/// Response interceptor that refreshes credentials and replays failed requests.
pub struct AuthRefresh {
    transport: Weak<dyn Transport>,
    client_id: ClientId,
    registry: Arc<RefreshRegistry>,
    handler: Arc<dyn RefreshHandler>,
    options: RefreshOptions,
    hooks: RefreshHooks,
}

impl AuthRefresh {
    /// Start configuring auth refresh around `handler`.
    pub fn builder<H: RefreshHandler>(handler: H) -> AuthRefreshBuilder {
        AuthRefreshBuilder {
            handler: Arc::new(handler),
            options: RefreshOptions::default(),
            hooks: RefreshHooks::default(),
            registry: None,
        }
    }

    /// Atomic trigger path. Returns the refresh to wait on, or `None` if the
    /// failure does not qualify.
    fn begin(&self, transport: &Arc<dyn Transport>, error: &TransportError) -> Option<RefreshHandle> {
        let client_id = self.client_id;
        self.registry.with_state(client_id, |state| {
            if !classifier::should_refresh(error, &self.options, &self.hooks, client_id, state) {
                return None;
            }

            if self.options.pauses_client() {
                state.paused_clients.insert(client_id);
            }
            let teardown = Teardown::new(
                Arc::clone(&self.registry),
                Arc::downgrade(transport),
                client_id,
            );
            let handle = refresh::start_or_join(state, error, &self.handler, teardown);
            gate::install(state, transport.as_ref(), handle.clone(), &self.hooks);
            Some(handle)
        })
    }

    async fn handle_failure(&self, error: TransportError) -> transport::Result<Response> {
        let Some(transport) = self.transport.upgrade() else {
            return Err(error);
        };
        let Some(refresh) = self.begin(&transport, &error) else {
            debug!(client_id = %self.client_id, error = %error, "failure does not qualify for refresh");
            return Err(error);
        };

        if let Err(e) = refresh.await {
            warn!(client_id = %self.client_id, error = %e, "not replaying request, refresh failed");
            return Err(TransportError::RefreshFailed {
                reason: e.to_string(),
                original: Box::new(error),
            });
        }

        let Some(config) = error.config().cloned() else {
            return Err(error);
        };
        let config = self.replay_config(config);
        debug!(client_id = %self.client_id, url = %config.url, "replaying request after refresh");
        metrics::counter!("auth_refresh_replays_total").increment(1);
        transport.replay(config).await
    }

    fn replay_config(&self, config: RequestConfig) -> RequestConfig {
        let mut config = self.hooks.apply_retry(config);
        config.skip_auth_refresh = true;
        config
    }
}

impl ResponseInterceptor for AuthRefresh {
    fn on_failure(
        &self,
        error: TransportError,
    ) -> Pin<Box<dyn Future<Output = transport::Result<Response>> + Send + '_>> {
        Box::pin(self.handle_failure(error))
    }
}

/// Builder returned by `AuthRefresh::builder`.
pub struct AuthRefreshBuilder {
    handler: Arc<dyn RefreshHandler>,
    options: RefreshOptions,
    hooks: RefreshHooks,
    registry: Option<Arc<RefreshRegistry>>,
}

impl AuthRefreshBuilder {
    pub fn options(mut self, options: RefreshOptions) -> Self {
        self.options = options;
        self
    }

    /// Decide qualification with a predicate instead of `status_codes`.
    pub fn should_refresh(
        mut self,
        predicate: impl Fn(&TransportError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.hooks.should_refresh = Some(Arc::new(predicate));
        self
    }

    /// Rewrite requests before they are replayed or released from the gate.
    pub fn on_retry(
        mut self,
        rewrite: impl Fn(RequestConfig) -> RequestConfig + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_retry = Some(Arc::new(rewrite));
        self
    }

    /// Keep coordination state in a caller-owned registry. Without one, each
    /// installation gets a private registry.
    pub fn registry(mut self, registry: Arc<RefreshRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Register coordination state for `transport` and install the response
    /// interceptor on it.
    pub fn install<T: Transport + 'static>(self, transport: &Arc<T>) -> Installation {
        let client_id = transport.id();
        let registry = self.registry.unwrap_or_default();
        registry.register(client_id);

        if self.options.skip_queue_while_refreshing.is_some() {
            warn!(%client_id, "skip_queue_while_refreshing is deprecated, use pause_client_during_refresh");
        }
        info!(
            %client_id,
            status_codes = ?self.options.status_codes,
            pause_client = self.options.pauses_client(),
            intercept_network_error = self.options.intercept_network_error,
            "auth refresh installed"
        );

        let weak: Weak<T> = Arc::downgrade(transport);
        let interceptor = AuthRefresh {
            transport: weak,
            client_id,
            registry: Arc::clone(&registry),
            handler: self.handler,
            options: self.options,
            hooks: self.hooks,
        };
        let interceptor_id = transport.add_response_interceptor(Arc::new(interceptor));

        Installation {
            client_id,
            interceptor_id,
            registry,
        }
    }
}

/// Handle to an installed `AuthRefresh`.
#[derive(Clone)]
pub struct Installation {
    client_id: ClientId,
    interceptor_id: InterceptorId,
    registry: Arc<RefreshRegistry>,
}

impl Installation {
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn interceptor_id(&self) -> InterceptorId {
        self.interceptor_id
    }

    pub fn registry(&self) -> &Arc<RefreshRegistry> {
        &self.registry
    }

    /// Eject the response interceptor and drop the client's coordination state.
    pub fn uninstall(self, transport: &dyn Transport) -> bool {
        let ejected = transport.eject_response_interceptor(self.interceptor_id);
        self.registry.remove(transport);
        info!(client_id = %self.client_id, "auth refresh uninstalled");
        ejected
    }
}
