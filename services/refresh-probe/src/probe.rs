//! Probe run
//!
//! Builds one `transport::Client` with a bearer interceptor, installs
//! `AuthRefresh` with an OAuth refresh grant as the handler, fires the
//! configured number of requests at once and tallies the outcomes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use auth_refresh::{AuthRefresh, RefreshError, RefreshHandler};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use tokio::task::JoinSet;
use tracing::{info, warn};
use transport::{Client, RequestConfig, Response, Transport, TransportError};

use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::{Error, Result};
use crate::token;

/// Refresh handler running the OAuth `refresh_token` grant.
///
/// Bounded by `timeout`: the coordinator itself never times a refresh out.
pub struct OAuthRefresher {
    http: reqwest::Client,
    endpoint: String,
    client_id: String,
    store: Arc<CredentialStore>,
    timeout: Duration,
}

impl OAuthRefresher {
    async fn rotate(&self) -> Result<()> {
        let refresh = self.store.refresh_token();
        if refresh.expose().is_empty() {
            return Err(Error::InvalidCredentials(
                "no refresh token in credentials file or REFRESH_TOKEN".into(),
            ));
        }
        let token =
            token::refresh_token(&self.http, &self.endpoint, &self.client_id, refresh.expose())
                .await?;
        self.store.update(token).await
    }
}

impl RefreshHandler for OAuthRefresher {
    fn refresh<'a>(
        &'a self,
        error: &'a TransportError,
    ) -> Pin<Box<dyn Future<Output = auth_refresh::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            info!(status = ?error.status(), endpoint = %self.endpoint, "rotating OAuth tokens");
            let outcome = match tokio::time::timeout(self.timeout, self.rotate()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(self.timeout)),
            };
            outcome.map_err(|e| RefreshError::Handler(e.to_string()))
        })
    }
}

/// Outcome counts for one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    pub ok: usize,
    pub failed: usize,
    /// Originating requests whose refresh failed
    pub refresh_failed: usize,
    /// Requests held by the gate and released by a failed refresh
    pub cancelled: usize,
}

impl Summary {
    fn record(&mut self, result: &transport::Result<Response>) -> &'static str {
        match result {
            Ok(_) => {
                self.ok += 1;
                "ok"
            }
            Err(e) if e.is_cancelled() => {
                self.cancelled += 1;
                "cancelled"
            }
            Err(TransportError::RefreshFailed { .. }) => {
                self.refresh_failed += 1;
                "refresh_failed"
            }
            Err(_) => {
                self.failed += 1;
                "failed"
            }
        }
    }

    pub fn total(&self) -> usize {
        self.ok + self.failed + self.refresh_failed + self.cancelled
    }

    pub fn all_ok(&self) -> bool {
        self.ok == self.total()
    }
}

/// Run the probe against `config.target`.
pub async fn run(config: &Config, store: Arc<CredentialStore>) -> Result<Summary> {
    let timeout = Duration::from_secs(config.target.timeout_secs);
    let http = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;

    let client = Arc::new(Client::new(http.clone()));

    let tokens = store.clone();
    client.add_request_interceptor(Arc::new(
        move |request: RequestConfig| -> transport::Result<RequestConfig> {
            let mut value = HeaderValue::from_str(&tokens.bearer())
                .map_err(|e| TransportError::Interceptor(format!("invalid access token: {e}")))?;
            value.set_sensitive(true);
            Ok(request.with_header(AUTHORIZATION, value))
        },
    ));

    let refresher = OAuthRefresher {
        http,
        endpoint: config.oauth.token_endpoint.clone(),
        client_id: config.oauth.client_id.clone(),
        store,
        timeout,
    };
    let installation = AuthRefresh::builder(refresher)
        .options(config.refresh.clone())
        .install(&client);

    info!(
        url = %config.target.url,
        concurrency = config.target.concurrency,
        client_id = %client.id(),
        "firing probe requests"
    );

    let mut requests = JoinSet::new();
    for request in 0..config.target.concurrency {
        let client = client.clone();
        let url = config.target.url.clone();
        requests.spawn(async move {
            let started = Instant::now();
            let result = client.send(RequestConfig::get(url)).await;
            (request, started.elapsed(), result)
        });
    }

    let mut summary = Summary::default();
    while let Some(joined) = requests.join_next().await {
        let (request, elapsed, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                warn!(error = %e, "probe request task did not complete");
                summary.failed += 1;
                continue;
            }
        };
        let outcome = summary.record(&result);
        crate::metrics::record_request(outcome, elapsed.as_secs_f64());
        let elapsed_ms = elapsed.as_millis() as u64;
        match result {
            Ok(response) => info!(
                request,
                status = response.status,
                elapsed_ms,
                "probe request succeeded"
            ),
            Err(e) => warn!(request, outcome, error = %e, elapsed_ms, "probe request failed"),
        }
    }

    installation.uninstall(client.as_ref());
    Ok(summary)
}
