//! Request configuration and response types
//!
//! `RequestConfig` is everything needed to (re)issue a request. It is kept
//! on every `Response` and every failure so that a failed request can be
//! replayed verbatim.

use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// A request as seen by interceptors and the dispatcher.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
    /// Opt this request out of auth-refresh handling. Set on replays so a
    /// replay that fails again cannot start another refresh.
    pub skip_auth_refresh: bool,
}

impl RequestConfig {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            skip_auth_refresh: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Mark this request so auth-refresh handling ignores its failures.
    pub fn bypass_auth_refresh(mut self) -> Self {
        self.skip_auth_refresh = true;
        self
    }
}

/// A completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// The request that produced this response, after request interceptors.
    pub config: RequestConfig,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_fill_in_fields() {
        let config = RequestConfig::post("http://upstream.test/v1/items", "{}")
            .with_header(
                reqwest::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )
            .with_timeout(Duration::from_secs(5));

        assert_eq!(config.method, Method::POST);
        assert_eq!(config.url, "http://upstream.test/v1/items");
        assert_eq!(config.body.as_deref(), Some(&b"{}"[..]));
        assert_eq!(
            config.headers.get(reqwest::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));
        assert!(!config.skip_auth_refresh);
    }

    #[test]
    fn bypass_sets_flag() {
        let config = RequestConfig::get("http://upstream.test/").bypass_auth_refresh();
        assert!(config.skip_auth_refresh);
    }

    #[test]
    fn success_range_is_2xx() {
        let response = |status| Response {
            status,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"ok"),
            config: RequestConfig::get("http://upstream.test/"),
        };
        assert!(response(200).is_success());
        assert!(response(204).is_success());
        assert!(!response(304).is_success());
        assert!(!response(401).is_success());
        assert_eq!(response(200).text(), "ok");
    }
}
