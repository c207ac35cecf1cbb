//! Retry policies
//!
//! A policy is consulted by a worker every time an attempt fails. It sees
//! the request (including how many retries it already had) and the failure,
//! and answers with a [`RetryDecision`]. Policies hold no mutable state, so
//! one instance is shared by every request of an engine.
//!
//! The shipped policy, [`RetryStrategy`], is plain data: a retry ceiling, a
//! [`Backoff`] and a [`Classifier`]. Named presets cover the common cases:
//!
//! | Preset | Retries | Delay | Retries on |
//! |--------|---------|-------|------------|
//! | `none` | 0 | - | never retried |
//! | `strict` | 2 | 2s constant | 5xx, 408, 429 |
//! | `big-scrape` | 8 | 500ms exponential, jittered | statuses + network errors |
//! | `small-scrape` | 4 | 60s constant | statuses + network errors |
//! | `api` | 2 | 500ms constant | 429, 502-504, timeouts |

mod backoff;
mod classify;
mod strategy;

pub use backoff::Backoff;
pub use classify::Classifier;
pub use strategy::RetryStrategy;

use crate::request::Request;
use crate::{Failure, RequestError};
use std::fmt;
use std::time::Duration;

/// What to do with a request whose attempt just failed
#[derive(Debug, Clone)]
pub enum RetryDecision {
    /// Give up and resolve the request's slot with this error
    Abandon(RequestError),
    /// Submit the request again, with `attempt + 1`, after this delay
    Resubmit(Duration),
}

/// Decides whether and when a failed request is tried again
///
/// Implementations must be pure: the decision depends only on the request,
/// the failure and the request's attempt count. Every implementation must
/// have a ceiling beyond which it always abandons.
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    fn decide(&self, request: &Request, failure: Failure) -> RetryDecision;
}

impl<P: RetryPolicy + ?Sized> RetryPolicy for std::sync::Arc<P> {
    fn decide(&self, request: &Request, failure: Failure) -> RetryDecision {
        (**self).decide(request, failure)
    }
}
