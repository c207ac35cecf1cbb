//! Swarm-Requests: synchronous-feeling HTTP swarms on a bounded async engine
//!
//! This crate lets a caller issue many HTTP requests as if they were
//! sequential while a fixed worker pool executes them concurrently, bounded
//! by a global threshold, retried by pluggable policies and delivered in the
//! order the caller asked for. Swarms created while consuming another swarm
//! are serviced first, so dependent work finishes before unrelated outer work
//! continues.

pub mod config;
pub mod engine;
pub mod hooks;
pub mod request;
pub mod response;
pub mod retry;
pub mod transport;

use thiserror::Error;

/// Main error type for Swarm-Requests operations
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Request failed: {0}")]
    Request(#[from] RequestError),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a single attempt of a request produced when it did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    /// The server answered with a status >= 400
    #[error("HTTP status {0}")]
    Status(u16),

    /// The transport never produced a response
    #[error(transparent)]
    Transport(#[from] transport::TransportError),
}

/// Broad classification of failures, used by retry policies and by callers
/// inspecting a terminal [`RequestError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Connection reset, timeout, 5xx: worth another attempt
    Transient,
    /// 4xx, malformed payload: retrying cannot help
    Permanent,
    /// The retry policy ran out of attempts
    PolicyExhausted,
    /// The engine was stopped before the request finished
    Shutdown,
}

/// Terminal failure of one request, delivered at that request's position
///
/// Failures caused by an HTTP error status keep the server's response, so
/// callers can still read its headers and body.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    #[error("Permanent failure for {url}: {failure}")]
    Permanent {
        url: String,
        attempts: u32,
        failure: Failure,
        response: Option<Box<RawResponse>>,
    },

    #[error("Retries exhausted for {url} after {attempts} attempts: {last}")]
    PolicyExhausted {
        url: String,
        attempts: u32,
        last: Failure,
        response: Option<Box<RawResponse>>,
    },

    #[error("Engine shut down before {url} completed")]
    Shutdown { url: String },
}

impl RequestError {
    /// Returns the target URL of the failed request
    pub fn url(&self) -> &str {
        match self {
            Self::Permanent { url, .. }
            | Self::PolicyExhausted { url, .. }
            | Self::Shutdown { url } => url,
        }
    }

    /// Returns the kind of this terminal failure
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Permanent { .. } => FailureKind::Permanent,
            Self::PolicyExhausted { .. } => FailureKind::PolicyExhausted,
            Self::Shutdown { .. } => FailureKind::Shutdown,
        }
    }

    /// Returns the underlying failure of the last attempt, if there was one
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Permanent { failure, .. } => Some(failure),
            Self::PolicyExhausted { last, .. } => Some(last),
            Self::Shutdown { .. } => None,
        }
    }

    /// Returns the HTTP status of the last attempt, if it got that far
    pub fn status(&self) -> Option<u16> {
        match self.failure() {
            Some(Failure::Status(code)) => Some(*code),
            _ => None,
        }
    }

    /// Returns the error response of the last attempt, if the server sent one
    pub fn response(&self) -> Option<&RawResponse> {
        match self {
            Self::Permanent { response, .. } | Self::PolicyExhausted { response, .. } => {
                response.as_deref()
            }
            Self::Shutdown { .. } => None,
        }
    }

    /// Attaches the response that caused this failure
    pub fn with_response(mut self, raw: RawResponse) -> Self {
        match &mut self {
            Self::Permanent { response, .. } | Self::PolicyExhausted { response, .. } => {
                *response = Some(Box::new(raw));
            }
            Self::Shutdown { .. } => {}
        }
        self
    }

    /// Turns a failure that carries an error response back into a [`Response`]
    ///
    /// Returns the error unchanged when there is no response to recover.
    pub fn into_response(self) -> std::result::Result<Response, Self> {
        match self {
            Self::Permanent {
                attempts,
                response: Some(raw),
                ..
            }
            | Self::PolicyExhausted {
                attempts,
                response: Some(raw),
                ..
            } => Ok(Response::new(*raw, attempts)),
            other => Err(other),
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Unknown {kind} preset: {name}")]
    UnknownPreset { kind: &'static str, name: String },
}

/// Result type alias for Swarm-Requests operations
pub type Result<T> = std::result::Result<T, SwarmError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use engine::{Each, Engine, EngineBuilder, Swarm, ThresholdLimits};
pub use hooks::{AcceptErrorStatus, PassThrough, ResponseCache, ResponsePreprocessor, ShortCircuit};
pub use request::{Payload, Request};
pub use response::Response;
pub use retry::{Backoff, Classifier, RetryDecision, RetryPolicy, RetryStrategy};
pub use transport::{HttpTransport, RawResponse, Transport, TransportError};
