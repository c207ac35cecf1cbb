//! Requests and their scheduling metadata
//!
//! A [`Payload`] is what the caller wants sent. A [`Request`] is the
//! envelope the engine moves between the scheduler, the workers and the
//! retry timers: the payload plus where it came from and how often it has
//! been tried.

mod payload;

pub use payload::Payload;

use crate::response::Response;
use crate::RequestError;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Terminal outcome delivered to a swarm slot
pub(crate) type Outcome = Result<Response, RequestError>;

/// An outcome tagged with the submission index it belongs to
pub(crate) type Delivery = (usize, Outcome);

/// Channel end through which a request reports back to its swarm
pub(crate) type ResultSink = mpsc::UnboundedSender<Delivery>;

/// Identifies the swarm that owns a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SwarmId(pub(crate) u64);

impl fmt::Display for SwarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "swarm-{}", self.0)
    }
}

/// One unit of work plus its scheduling metadata
///
/// Everything but `attempt` is fixed when the owning swarm is created.
/// A request that is dropped without having delivered an outcome reports
/// [`RequestError::Shutdown`] to its swarm, so every position of a swarm
/// always resolves exactly once.
#[derive(Debug)]
pub struct Request {
    payload: Arc<Payload>,
    submission_index: usize,
    nesting_depth: u32,
    sequence: u64,
    attempt: u32,
    swarm_id: SwarmId,
    sink: Option<ResultSink>,
}

impl Request {
    pub(crate) fn new(
        payload: Payload,
        submission_index: usize,
        nesting_depth: u32,
        sequence: u64,
        swarm_id: SwarmId,
        sink: ResultSink,
    ) -> Self {
        Self {
            payload: Arc::new(payload),
            submission_index,
            nesting_depth,
            sequence,
            attempt: 0,
            swarm_id,
            sink: Some(sink),
        }
    }

    /// Creates a request that belongs to no swarm
    ///
    /// Useful for exercising a [`RetryPolicy`](crate::retry::RetryPolicy)
    /// in isolation.
    pub fn detached(payload: impl Into<Payload>, attempt: u32) -> Self {
        Self {
            payload: Arc::new(payload.into()),
            submission_index: 0,
            nesting_depth: 0,
            sequence: 0,
            attempt,
            swarm_id: SwarmId(0),
            sink: None,
        }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn url(&self) -> &str {
        self.payload.url()
    }

    /// Position of this request in its swarm's input sequence
    pub fn submission_index(&self) -> usize {
        self.submission_index
    }

    /// Depth of the swarm that produced this request (deeper runs first)
    pub fn nesting_depth(&self) -> u32 {
        self.nesting_depth
    }

    /// Engine-wide submission order, used as the FIFO tie-breaker
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Number of retries already performed (0 for the first attempt)
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn swarm_id(&self) -> SwarmId {
        self.swarm_id
    }

    /// Returns true once nobody is waiting for this request's outcome
    pub(crate) fn is_abandoned(&self) -> bool {
        self.sink.as_ref().map_or(true, |sink| sink.is_closed())
    }

    /// Consumes the request for its next attempt
    pub(crate) fn next_attempt(mut self) -> Self {
        self.attempt += 1;
        self
    }

    /// Resolves this request's swarm slot
    pub(crate) fn deliver(mut self, outcome: Outcome) {
        if let Some(sink) = self.sink.take() {
            if sink.send((self.submission_index, outcome)).is_err() {
                tracing::trace!(
                    "{} dropped before {} resolved; discarding outcome",
                    self.swarm_id,
                    self.payload.url()
                );
            }
        }
    }

    pub(crate) fn shutdown_error(&self) -> RequestError {
        RequestError::Shutdown {
            url: self.payload.url().to_string(),
        }
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            let error = self.shutdown_error();
            let _ = sink.send((self.submission_index, Err(error)));
        }
    }
}
