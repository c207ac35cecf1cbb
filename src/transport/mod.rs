//! Transport collaborator
//!
//! The engine never speaks HTTP itself. Every attempt is handed to a
//! [`Transport`], which owns connection pooling, TLS and the cookie session
//! shared by all requests issued through one engine.

mod http;

pub use http::{build_http_client, HttpTransport};

use crate::request::Payload;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::fmt;
use thiserror::Error;

/// Raw outcome of one completed exchange
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// Final URL after redirects
    pub url: String,
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Undecoded response body
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Creates a response with empty headers
    pub fn new(url: impl Into<String>, status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

/// Reasons a transport could not produce a response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed")]
    Connect,

    #[error("Connection reset")]
    Reset,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed to read body: {0}")]
    Body(String),

    #[error("Transport error: {0}")]
    Other(String),
}

/// Executes one attempt of a request
///
/// Implementations must be cheap to share: the engine keeps a single
/// instance behind an `Arc` and calls it from every worker.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, payload: &Payload) -> Result<RawResponse, TransportError>;
}

impl fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn Transport")
    }
}
