//! Remote transport used by [`EampClient`](super::EampClient).
//!
//! The client only needs `GET` with path segments and query parameters, so
//! the seam is kept that narrow. [`HttpTransport`] is the production
//! implementation; tests plug in an in-memory one.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue, RETRY_AFTER, USER_AGENT};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::ClientOptions;

/// Raw outcome of a remote call that reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// Parsed `Retry-After` header, in seconds.
    pub retry_after: Option<u64>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as text, lossy, for error messages.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Failures that happen before a response is available.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportFailure {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport misconfigured: {0}")]
    Configuration(String),

    #[error("{0}")]
    Other(String),
}

/// Async request/response seam between the client and the network.
pub trait Transport: Send + Sync + 'static {
    /// Short name used in error reports, e.g. `"http"`.
    fn name(&self) -> &'static str;

    /// `GET` the resource addressed by `segments` (each one percent-encoded
    /// by the transport) with the given query parameters.
    fn get(
        &self,
        segments: &[&str],
        query: &[(String, String)],
    ) -> impl Future<Output = Result<TransportResponse, TransportFailure>> + Send;

    /// Release held connections. The transport may be used again afterwards.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// `reqwest`-backed transport with a lazily built client.
pub struct HttpTransport {
    base_url: Option<String>,
    timeout: Duration,
    user_agent: Option<String>,
    headers: Vec<(String, String)>,
    client: RwLock<Option<reqwest::Client>>,
}

impl HttpTransport {
    pub fn new(options: &ClientOptions) -> Self {
        Self {
            base_url: options.base_url.clone(),
            timeout: options.timeout,
            user_agent: options.user_agent.clone(),
            headers: options.headers.clone(),
            client: RwLock::new(None),
        }
    }

    /// Whether a client is currently held.
    pub async fn is_connected(&self) -> bool {
        self.client.read().await.is_some()
    }

    async fn ensure_client(&self) -> Result<reqwest::Client, TransportFailure> {
        if let Some(client) = self.client.read().await.as_ref() {
            return Ok(client.clone());
        }

        let mut guard = self.client.write().await;
        // Another task may have won the race for the write lock
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }

        let client = self.build_client()?;
        *guard = Some(client.clone());
        debug!(base_url = ?self.base_url, "HTTP client initialized");
        Ok(client)
    }

    fn build_client(&self) -> Result<reqwest::Client, TransportFailure> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/eamp+json, application/json"),
        );
        if let Some(agent) = &self.user_agent {
            let value = HeaderValue::from_str(agent)
                .map_err(|e| TransportFailure::Configuration(format!("user agent: {e}")))?;
            headers.insert(USER_AGENT, value);
        }
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportFailure::Configuration(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportFailure::Configuration(format!("header {name}: {e}")))?;
            headers.insert(name, value);
        }

        reqwest::Client::builder()
            .timeout(self.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| TransportFailure::Configuration(e.to_string()))
    }

    fn url_for(&self, segments: &[&str]) -> Result<reqwest::Url, TransportFailure> {
        let base = self
            .base_url
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| TransportFailure::Configuration("Base URL is required".to_string()))?;

        let mut url = reqwest::Url::parse(base)
            .map_err(|e| TransportFailure::Configuration(format!("invalid base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| {
                TransportFailure::Configuration("base URL cannot carry a path".to_string())
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn get(
        &self,
        segments: &[&str],
        query: &[(String, String)],
    ) -> Result<TransportResponse, TransportFailure> {
        let url = self.url_for(segments)?;
        let client = self.ensure_client().await?;

        let response = client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(TransportResponse {
            status,
            retry_after,
            body: body.to_vec(),
        })
    }

    async fn close(&self) {
        if self.client.write().await.take().is_some() {
            info!("HTTP client released");
        }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportFailure {
    if err.is_timeout() {
        TransportFailure::Timeout
    } else if err.is_connect() {
        TransportFailure::Connect(err.to_string())
    } else {
        TransportFailure::Other(err.to_string())
    }
}
