//! HTTP transport abstraction.
//!
//! The registry client and the install pipeline only ever issue plain GETs.
//! They do so through [`HttpTransport`] so tests can substitute an in-memory
//! transport and hosts can bring their own client (proxies, auth, metrics).

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::cache::BoxFuture;
use crate::config::DEFAULT_HTTP_TIMEOUT_SECS;

const DEFAULT_USER_AGENT: &str = concat!("grabthar/", env!("CARGO_PKG_VERSION"));

/// Errors from the transport itself. HTTP error statuses are not errors at
/// this level; callers inspect [`HttpResponse::status`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Request timed out.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    /// Connection, TLS or protocol failure.
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// The response body could not be read.
    #[error("failed to read response body from {url}: {reason}")]
    Body { url: String, reason: String },

    /// The transport could not be constructed.
    #[error("failed to create HTTP client: {0}")]
    Client(String),
}

/// A complete HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Minimal async HTTP client.
pub trait HttpTransport: Send + Sync {
    /// GET `url`, returning the full response whatever its status.
    fn get(&self, url: &str) -> BoxFuture<'_, Result<HttpResponse, TransportError>>;
}

/// [`HttpTransport`] backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ReqwestTransport {
    /// Create a transport with the default 30 second request timeout.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
    }

    /// Create a transport with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(DEFAULT_USER_AGENT)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self, url: String) -> Result<HttpResponse, TransportError> {
        trace!(url = %url, "HTTP GET request starting");

        let response = self.client.get(&url).send().await.map_err(|e| {
            warn!(
                url = %url,
                error = %e,
                is_connect = e.is_connect(),
                is_timeout = e.is_timeout(),
                "HTTP request failed"
            );
            if e.is_timeout() {
                TransportError::Timeout {
                    url: url.clone(),
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                TransportError::Request {
                    url: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        debug!(url = %url, status = status, "HTTP response received");

        let body = response.bytes().await.map_err(|e| TransportError::Body {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        Box::pin(self.fetch(url.to_string()))
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory transport keyed by URL (query string ignored).
    ///
    /// Unknown URLs answer 404. Every request is recorded.
    #[derive(Default)]
    pub struct MockTransport {
        routes: Mutex<HashMap<String, Result<HttpResponse, TransportError>>>,
        requests: Mutex<Vec<String>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(&self, url: &str, status: u16, body: impl Into<Vec<u8>>) {
            self.routes
                .lock()
                .unwrap()
                .insert(url.to_string(), Ok(HttpResponse::new(status, body)));
        }

        pub fn respond_json(&self, url: &str, value: &serde_json::Value) {
            self.respond(url, 200, value.to_string());
        }

        pub fn fail(&self, url: &str) {
            self.routes.lock().unwrap().insert(
                url.to_string(),
                Err(TransportError::Request {
                    url: url.to_string(),
                    reason: "connection refused".to_string(),
                }),
            );
        }

        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl HttpTransport for MockTransport {
        fn get(&self, url: &str) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
            self.requests.lock().unwrap().push(url.to_string());
            let route = url.split('?').next().unwrap_or(url);
            let response = self
                .routes
                .lock()
                .unwrap()
                .get(route)
                .cloned()
                .unwrap_or_else(|| Ok(HttpResponse::new(404, "not found")));
            Box::pin(async move { response })
        }
    }

    #[test]
    fn test_response_success_range() {
        assert!(HttpResponse::new(200, "").is_success());
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(304, "").is_success());
        assert!(!HttpResponse::new(500, "").is_success());
    }

    #[test]
    fn test_reqwest_transport_timeout() {
        let transport = ReqwestTransport::new().unwrap();
        assert_eq!(
            transport.timeout(),
            Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS)
        );

        let transport = ReqwestTransport::with_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(transport.timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_mock_transport_routes_ignore_query() {
        let mock = MockTransport::new();
        mock.respond("https://cdn.test/pkg/info.json", 200, "{}");

        let hit = mock
            .get("https://cdn.test/pkg/info.json?cache-bust=1")
            .await
            .unwrap();
        assert_eq!(hit.status, 200);

        let miss = mock.get("https://cdn.test/other").await.unwrap();
        assert_eq!(miss.status, 404);
        assert_eq!(mock.request_count(), 2);
    }
}
