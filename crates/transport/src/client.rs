//! `reqwest`-backed client with interceptor chains
//!
//! `Client` owns two interceptor chains and a `Dispatch` implementation. In
//! production the dispatcher is `ReqwestDispatch`; tests substitute an
//! in-memory dispatcher to script upstream behavior.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::interceptor::{InterceptorChain, InterceptorId};
use crate::request::{RequestConfig, Response};
use crate::{ClientId, RequestInterceptor, ResponseInterceptor, Transport};

/// Sends a fully intercepted request and returns whatever upstream answered.
///
/// Implementations return `Ok` for every HTTP response regardless of status;
/// `Client` turns non-2xx into `TransportError::Status`.
pub trait Dispatch: Send + Sync {
    fn dispatch(
        &self,
        config: RequestConfig,
    ) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + '_>>;
}

/// Dispatcher backed by a shared `reqwest::Client`.
pub struct ReqwestDispatch {
    http: reqwest::Client,
}

impl ReqwestDispatch {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Dispatch for ReqwestDispatch {
    fn dispatch(
        &self,
        config: RequestConfig,
    ) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + '_>> {
        Box::pin(async move {
            let mut builder = self
                .http
                .request(config.method.clone(), &config.url)
                .headers(config.headers.clone());
            if let Some(body) = &config.body {
                builder = builder.body(body.clone());
            }
            if let Some(timeout) = config.timeout {
                builder = builder.timeout(timeout);
            }

            let response = match builder.send().await {
                Ok(response) => response,
                Err(e) => {
                    return Err(TransportError::Network {
                        config: Box::new(config),
                        message: e.to_string(),
                    });
                }
            };

            let status = response.status().as_u16();
            let headers = response.headers().clone();
            match response.bytes().await {
                Ok(body) => Ok(Response {
                    status,
                    headers,
                    body,
                    config,
                }),
                Err(e) => Err(TransportError::Network {
                    config: Box::new(config),
                    message: format!("reading response body: {e}"),
                }),
            }
        })
    }
}

/// HTTP client exposing request/response interception and replay.
///
/// Share it via `Arc`; interceptors that need to call back into the client
/// should hold a `Weak` to avoid a reference cycle through the chains.
pub struct Client {
    id: ClientId,
    dispatch: Arc<dyn Dispatch>,
    request_interceptors: InterceptorChain<dyn RequestInterceptor>,
    response_interceptors: InterceptorChain<dyn ResponseInterceptor>,
}

impl Client {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_dispatch(Arc::new(ReqwestDispatch::new(http)))
    }

    pub fn with_dispatch(dispatch: Arc<dyn Dispatch>) -> Self {
        Self {
            id: ClientId::new(),
            dispatch,
            request_interceptors: InterceptorChain::new(),
            response_interceptors: InterceptorChain::new(),
        }
    }

    /// Send a request through the interceptor pipeline.
    pub async fn send(&self, config: RequestConfig) -> Result<Response> {
        let mut outcome = self.intercept_and_dispatch(config).await;
        for interceptor in self.response_interceptors.snapshot() {
            outcome = match outcome {
                Ok(response) => interceptor.on_success(response).await,
                Err(error) => interceptor.on_failure(error).await,
            };
        }
        outcome
    }

    pub fn request_interceptor_count(&self) -> usize {
        self.request_interceptors.len()
    }

    pub fn response_interceptor_count(&self) -> usize {
        self.response_interceptors.len()
    }

    async fn intercept_and_dispatch(&self, mut config: RequestConfig) -> Result<Response> {
        // Newest first: a gate installed after a header injector runs before it.
        for interceptor in self.request_interceptors.snapshot().into_iter().rev() {
            config = interceptor.intercept(config).await?;
        }

        debug!(client_id = %self.id, method = %config.method, url = %config.url, "dispatching request");
        let response = self.dispatch.dispatch(config).await?;
        if response.is_success() {
            Ok(response)
        } else {
            debug!(client_id = %self.id, status = response.status, url = %response.config.url, "upstream returned error status");
            Err(TransportError::Status(Box::new(response)))
        }
    }
}

impl Transport for Client {
    fn id(&self) -> ClientId {
        self.id
    }

    fn add_request_interceptor(&self, interceptor: Arc<dyn RequestInterceptor>) -> InterceptorId {
        self.request_interceptors.add(interceptor)
    }

    fn eject_request_interceptor(&self, id: InterceptorId) -> bool {
        self.request_interceptors.eject(id)
    }

    fn add_response_interceptor(
        &self,
        interceptor: Arc<dyn ResponseInterceptor>,
    ) -> InterceptorId {
        self.response_interceptors.add(interceptor)
    }

    fn eject_response_interceptor(&self, id: InterceptorId) -> bool {
        self.response_interceptors.eject(id)
    }

    fn replay(
        &self,
        config: RequestConfig,
    ) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + '_>> {
        Box::pin(self.send(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use bytes::Bytes;
    use reqwest::header::HeaderValue;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    /// Start a mock upstream with a success route, a 401 route, and a route
    /// that echoes the Authorization header.
    async fn start_upstream() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let url = format!("http://{addr}");

        let handle = tokio::spawn(async move {
            let app = axum::Router::new()
                .route("/ok", get(|| async { "hello" }))
                .route(
                    "/denied",
                    get(|| async { (StatusCode::UNAUTHORIZED, "token expired") }),
                )
                .route(
                    "/echo-auth",
                    get(|headers: HeaderMap| async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string();
                        axum::Json(serde_json::json!({ "authorization": auth }))
                    }),
                );
            axum::serve(listener, app).await.unwrap();
        });

        (url, handle)
    }

    /// In-memory dispatcher that records every request it sees and answers 200.
    #[derive(Default)]
    struct RecordingDispatch {
        seen: Mutex<Vec<RequestConfig>>,
    }

    impl Dispatch for RecordingDispatch {
        fn dispatch(
            &self,
            config: RequestConfig,
        ) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + '_>> {
            self.seen.lock().unwrap().push(config.clone());
            Box::pin(async move {
                Ok(Response {
                    status: 200,
                    headers: reqwest::header::HeaderMap::new(),
                    body: Bytes::from_static(b"recorded"),
                    config,
                })
            })
        }
    }

    fn append_order(tag: &'static str) -> Arc<dyn RequestInterceptor> {
        Arc::new(move |mut config: RequestConfig| -> Result<RequestConfig> {
            let current = config
                .headers
                .get("x-order")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            config.headers.insert(
                "x-order",
                HeaderValue::from_str(&format!("{current}{tag}")).unwrap(),
            );
            Ok(config)
        })
    }

    struct RecoverAll {
        failures: AtomicUsize,
    }

    impl ResponseInterceptor for RecoverAll {
        fn on_failure(
            &self,
            error: TransportError,
        ) -> Pin<Box<dyn Future<Output = Result<Response>> + Send + '_>> {
            self.failures.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                Ok(Response {
                    status: 200,
                    headers: reqwest::header::HeaderMap::new(),
                    body: Bytes::from(format!("recovered: {error}")),
                    config: RequestConfig::get("recovered"),
                })
            })
        }
    }

    #[tokio::test]
    async fn send_returns_success_response() {
        let (url, _server) = start_upstream().await;
        let client = Client::new(reqwest::Client::new());

        let response = client.send(RequestConfig::get(format!("{url}/ok"))).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.text(), "hello");
        assert_eq!(response.config.url, format!("{url}/ok"));
    }

    #[tokio::test]
    async fn non_success_status_becomes_status_error() {
        let (url, _server) = start_upstream().await;
        let client = Client::new(reqwest::Client::new());

        let err = client
            .send(RequestConfig::get(format!("{url}/denied")))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert_eq!(err.response().unwrap().text(), "token expired");
        assert_eq!(err.config().unwrap().url, format!("{url}/denied"));
    }

    #[tokio::test]
    async fn request_interceptor_headers_reach_upstream() {
        let (url, _server) = start_upstream().await;
        let client = Client::new(reqwest::Client::new());
        client.add_request_interceptor(Arc::new(
            |config: RequestConfig| -> Result<RequestConfig> {
                Ok(config.with_header(
                    reqwest::header::AUTHORIZATION,
                    HeaderValue::from_static("Bearer at_test"),
                ))
            },
        ));

        let response = client
            .send(RequestConfig::get(format!("{url}/echo-auth")))
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(json["authorization"], "Bearer at_test");
    }

    #[tokio::test]
    async fn unreachable_upstream_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = Client::new(reqwest::Client::new());
        let err = client
            .send(RequestConfig::get(format!("http://{addr}/ok")))
            .await
            .unwrap_err();
        assert!(err.is_network(), "got: {err:?}");
        assert!(err.response().is_none());
        assert!(err.config().is_some());
    }

    #[tokio::test]
    async fn request_interceptors_run_newest_first() {
        let dispatch = Arc::new(RecordingDispatch::default());
        let client = Client::with_dispatch(dispatch.clone());
        client.add_request_interceptor(append_order("a"));
        client.add_request_interceptor(append_order("b"));
        client.add_request_interceptor(append_order("c"));

        client.send(RequestConfig::get("mem://order")).await.unwrap();

        let seen = dispatch.seen.lock().unwrap();
        assert_eq!(seen[0].headers.get("x-order").unwrap(), "cba");
    }

    #[tokio::test]
    async fn ejected_interceptor_no_longer_runs() {
        let dispatch = Arc::new(RecordingDispatch::default());
        let client = Client::with_dispatch(dispatch.clone());
        let a = client.add_request_interceptor(append_order("a"));
        client.add_request_interceptor(append_order("b"));

        assert!(client.eject_request_interceptor(a));
        assert_eq!(client.request_interceptor_count(), 1);
        client.send(RequestConfig::get("mem://order")).await.unwrap();

        let seen = dispatch.seen.lock().unwrap();
        assert_eq!(seen[0].headers.get("x-order").unwrap(), "b");
    }

    #[tokio::test]
    async fn interceptor_error_skips_dispatch_and_reaches_response_interceptors() {
        let dispatch = Arc::new(RecordingDispatch::default());
        let client = Client::with_dispatch(dispatch.clone());
        client.add_request_interceptor(Arc::new(
            |_config: RequestConfig| -> Result<RequestConfig> {
                Err(TransportError::Interceptor("missing credentials".into()))
            },
        ));
        let recover = Arc::new(RecoverAll {
            failures: AtomicUsize::new(0),
        });
        client.add_response_interceptor(recover.clone());

        let response = client.send(RequestConfig::get("mem://blocked")).await.unwrap();
        assert!(response.text().contains("missing credentials"));
        assert_eq!(recover.failures.load(Ordering::SeqCst), 1);
        assert!(dispatch.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn response_interceptor_sees_status_failures() {
        let (url, _server) = start_upstream().await;
        let client = Client::new(reqwest::Client::new());
        let recover = Arc::new(RecoverAll {
            failures: AtomicUsize::new(0),
        });
        let id = client.add_response_interceptor(recover.clone());

        let response = client
            .send(RequestConfig::get(format!("{url}/denied")))
            .await
            .unwrap();
        assert!(response.text().starts_with("recovered:"));

        assert!(client.eject_response_interceptor(id));
        assert_eq!(client.response_interceptor_count(), 0);
        let err = client
            .send(RequestConfig::get(format!("{url}/denied")))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert_eq!(recover.failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn replay_runs_full_pipeline() {
        let dispatch = Arc::new(RecordingDispatch::default());
        let client = Client::with_dispatch(dispatch.clone());
        client.add_request_interceptor(append_order("x"));

        let replayed = client
            .replay(RequestConfig::get("mem://replay").bypass_auth_refresh())
            .await
            .unwrap();
        assert!(replayed.config.skip_auth_refresh);
        assert_eq!(replayed.config.headers.get("x-order").unwrap(), "x");
        assert_eq!(dispatch.seen.lock().unwrap().len(), 1);
    }
}
