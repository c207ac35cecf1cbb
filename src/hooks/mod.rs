//! Caller hooks around each request
//!
//! This module handles:
//! - Mapping terminal outcomes before a swarm yields them ([`ResponsePreprocessor`])
//! - Answering requests without sending them ([`ShortCircuit`])
//!
//! An engine carries one default preprocessor, which a single swarm or a
//! single [`Engine::one_with`](crate::Engine::one_with) call can replace.
//! Short circuits are consulted once per payload when a swarm is opened, so
//! an answered payload never takes a slot or a pacing tick.

mod cache;

pub use cache::ResponseCache;

use crate::request::Payload;
use crate::response::Response;
use crate::transport::RawResponse;
use crate::RequestError;
use std::fmt;

/// Shapes every terminal outcome right before a swarm yields it
///
/// Both hooks default to passing the outcome through, so an implementation
/// only overrides the side it cares about. Typical uses are recording
/// responses somewhere, or treating HTTP errors as ordinary responses.
pub trait ResponsePreprocessor: Send + Sync {
    fn success(&self, response: Response) -> Result<Response, RequestError> {
        Ok(response)
    }

    fn error(&self, error: RequestError) -> Result<Response, RequestError> {
        Err(error)
    }

    /// Routes `outcome` to [`success`](Self::success) or [`error`](Self::error)
    fn process(&self, outcome: Result<Response, RequestError>) -> Result<Response, RequestError> {
        match outcome {
            Ok(response) => self.success(response),
            Err(error) => self.error(error),
        }
    }
}

impl fmt::Debug for dyn ResponsePreprocessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn ResponsePreprocessor")
    }
}

/// Yields outcomes unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl ResponsePreprocessor for PassThrough {}

/// Yields HTTP error statuses as responses instead of errors
///
/// Failures without a server response (timeouts, shutdown) stay errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptErrorStatus;

impl ResponsePreprocessor for AcceptErrorStatus {
    fn error(&self, error: RequestError) -> Result<Response, RequestError> {
        error.into_response()
    }
}

/// Answers a payload without sending it, for example from a cache
///
/// A payload that gets an answer resolves immediately as a success with
/// zero attempts; everything else is queued as usual.
pub trait ShortCircuit: Send + Sync {
    fn answer(&self, payload: &Payload) -> Option<RawResponse>;
}

impl<F> ShortCircuit for F
where
    F: Fn(&Payload) -> Option<RawResponse> + Send + Sync,
{
    fn answer(&self, payload: &Payload) -> Option<RawResponse> {
        self(payload)
    }
}

impl fmt::Debug for dyn ShortCircuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn ShortCircuit")
    }
}
