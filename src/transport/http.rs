//! reqwest-backed transport
//!
//! This module handles the actual HTTP exchange for the engine, including:
//! - Building the shared HTTP client with a proper user agent string
//! - Keeping a cookie session across every request of one engine
//! - Applying the default (or per-payload) timeout
//! - Mapping reqwest errors onto [`TransportError`]

use super::{RawResponse, Transport, TransportError};
use crate::config::UserAgentConfig;
use crate::request::Payload;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `timeout` - Default timeout applied to each request, if any
///
/// # Example
///
/// ```no_run
/// use swarm_requests::config::UserAgentConfig;
/// use swarm_requests::transport::build_http_client;
/// use std::time::Duration;
///
/// let client = build_http_client(&UserAgentConfig::default(), Some(Duration::from_secs(30))).unwrap();
/// ```
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Option<Duration>,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(config.header_value())
        .connect_timeout(Duration::from_secs(10))
        .cookie_store(true)
        .gzip(true)
        .brotli(true);

    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }

    builder.build()
}

/// Transport that sends payloads with a shared [`reqwest::Client`]
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport with a freshly built client
    pub fn new(config: &UserAgentConfig, timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config, timeout)?,
        })
    }

    /// Wraps an existing client, e.g. one with custom TLS settings
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Returns the underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, payload: &Payload) -> Result<RawResponse, TransportError> {
        let url = reqwest::Url::parse(payload.url())
            .map_err(|e| TransportError::InvalidRequest(format!("{}: {}", payload.url(), e)))?;

        let mut request = self
            .client
            .request(payload.method().clone(), url)
            .headers(payload.headers().clone());

        if let Some(body) = payload.body() {
            request = request.body(body.to_vec());
        }
        if let Some(timeout) = payload.timeout() {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| classify_error(&e))?;

        let status = response.status();
        let final_url = response.url().to_string();
        let headers = response.headers().clone();

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;

        tracing::trace!("{} {} -> {}", payload.method(), final_url, status);

        Ok(RawResponse {
            url: final_url,
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

/// Maps a reqwest error onto the engine's transport taxonomy
fn classify_error(e: &reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect
    } else if e.is_builder() {
        TransportError::InvalidRequest(e.to_string())
    } else if e.is_body() || e.is_decode() {
        TransportError::Body(e.to_string())
    } else if e.is_request() {
        TransportError::Reset
    } else {
        TransportError::Other(e.to_string())
    }
}
