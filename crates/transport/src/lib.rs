//! Interceptable HTTP client
//!
//! Defines the contract the auth-refresh coordinator needs from an HTTP
//! client: request interceptors that may delay or rewrite a request before it
//! is sent, response interceptors that see every outcome, and a replay
//! primitive. `Client` implements the contract on top of `reqwest`.
//!
//! Request flow through `Client::send`:
//! 1. Request interceptors run newest-first; any error short-circuits dispatch
//! 2. The final `RequestConfig` is dispatched (reqwest in production)
//! 3. Non-2xx responses become `TransportError::Status`
//! 4. Response interceptors run oldest-first on the outcome and may recover it

pub mod client;
pub mod error;
pub mod interceptor;
pub mod request;

pub use client::{Client, Dispatch, ReqwestDispatch};
pub use error::{Result, TransportError};
pub use interceptor::InterceptorId;
pub use request::{RequestConfig, Response};

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Process-unique identity of a client instance.
///
/// Coordination state is keyed by this value, so two clients pointed at the
/// same upstream never share a refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(uuid::Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Hook run on every outgoing request before dispatch.
///
/// The returned future may suspend (e.g. until a credential refresh settles).
/// Returning an error aborts the request; the error is then handed to the
/// response interceptors like any other failure.
pub trait RequestInterceptor: Send + Sync {
    fn intercept(
        &self,
        config: RequestConfig,
    ) -> Pin<Box<dyn Future<Output = Result<RequestConfig>> + Send + '_>>;
}

/// Synchronous request transforms (header injection and the like).
impl<F> RequestInterceptor for F
where
    F: Fn(RequestConfig) -> Result<RequestConfig> + Send + Sync,
{
    fn intercept(
        &self,
        config: RequestConfig,
    ) -> Pin<Box<dyn Future<Output = Result<RequestConfig>> + Send + '_>> {
        let outcome = self(config);
        Box::pin(async move { outcome })
    }
}

/// Hook run on every request outcome.
///
/// `on_success` defaults to pass-through. `on_failure` may recover the
/// failure (return `Ok`) or propagate a possibly different error.
pub trait ResponseInterceptor: Send + Sync {
    fn on_success(
        &self,
        response: Response,
    ) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + '_>> {
        Box::pin(async move { Ok(response) })
    }

    fn on_failure(
        &self,
        error: TransportError,
    ) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + '_>>;
}

/// Everything the auth-refresh coordinator needs from an HTTP client.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    /// Identity used to key per-client coordination state.
    fn id(&self) -> ClientId;

    fn add_request_interceptor(&self, interceptor: Arc<dyn RequestInterceptor>) -> InterceptorId;

    /// Returns false if no interceptor with this id was installed.
    fn eject_request_interceptor(&self, id: InterceptorId) -> bool;

    fn add_response_interceptor(&self, interceptor: Arc<dyn ResponseInterceptor>)
    -> InterceptorId;

    fn eject_response_interceptor(&self, id: InterceptorId) -> bool;

    /// Issue a previously attempted request again, through the full
    /// interceptor pipeline.
    fn replay(
        &self,
        config: RequestConfig,
    ) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + '_>>;
}
