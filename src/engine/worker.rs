//! Worker pool
//!
//! Each worker loops: wait until work is queued, get admitted by the
//! threshold controller, take the highest-priority request at the admitted
//! instant, hand the payload to the transport, then either resolve the
//! request's swarm slot or ask the retry policy what to do. Retries wait on
//! their own timer task so the worker moves on immediately.
//!
//! The request is chosen only after every admission wait is over, so a
//! nested swarm submitted while workers wait out the pacing still goes
//! first.

use super::threshold::Claim;
use super::Shared;
use crate::request::Request;
use crate::response::Response;
use crate::retry::RetryDecision;
use crate::Failure;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Starts `count` workers on the current Tokio runtime
pub(crate) fn spawn_workers(shared: &Arc<Shared>, count: usize) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|id| tokio::spawn(run_worker(id, Arc::clone(shared))))
        .collect()
}

async fn run_worker(id: usize, shared: Arc<Shared>) {
    tracing::trace!("Worker {} started", id);

    // Idle workers park here rather than holding slots or pacing turns
    while shared.scheduler.ready().await {
        let claim = tokio::select! {
            claim = shared.threshold.claim(|| shared.scheduler.try_take()) => claim,
            _ = shared.scheduler.closed() => Claim::Closed,
        };

        match claim {
            Claim::Admitted(admission, request) => {
                execute(&shared, request).await;
                admission.release();
            }
            // Another worker got there first
            Claim::Idle => continue,
            Claim::Closed => break,
        }
    }

    tracing::trace!("Worker {} stopped", id);
}

/// Performs one attempt and routes its outcome
async fn execute(shared: &Arc<Shared>, request: Request) {
    tracing::debug!(
        "Dispatching {} {} (depth {}, attempt {})",
        request.payload().method(),
        request.url(),
        request.nesting_depth(),
        request.attempt()
    );

    let (failure, error_response) = match shared.transport.execute(request.payload()).await {
        Ok(raw) if raw.status.as_u16() < 400 => {
            let attempts = request.attempt() + 1;
            tracing::debug!("Completed {} with {}", request.url(), raw.status);
            request.deliver(Ok(Response::new(raw, attempts)));
            return;
        }
        Ok(raw) => (Failure::Status(raw.status.as_u16()), Some(raw)),
        Err(e) => (Failure::Transport(e), None),
    };

    match shared.retry.decide(&request, failure.clone()) {
        RetryDecision::Resubmit(delay) => {
            tracing::warn!(
                "Attempt {} of {} failed ({}); retrying in {:?}",
                request.attempt() + 1,
                request.url(),
                failure,
                delay
            );
            schedule_retry(shared, request.next_attempt(), delay);
        }
        RetryDecision::Abandon(error) => {
            tracing::warn!("Giving up on {}: {}", request.url(), error);
            let error = match error_response {
                Some(raw) => error.with_response(raw),
                None => error,
            };
            request.deliver(Err(error));
        }
    }
}

/// Resubmits `request` after `delay` without holding up the worker
///
/// If the engine stops first, the request is dropped, which resolves its
/// slot as a shutdown. If its swarm is gone, nothing is resubmitted.
fn schedule_retry(shared: &Arc<Shared>, request: Request, delay: Duration) {
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shared.scheduler.closed() => return,
        }

        if request.is_abandoned() {
            tracing::trace!("Not retrying {}: swarm dropped", request.url());
            return;
        }

        if shared.scheduler.submit(request).is_err() {
            tracing::trace!("Retry rejected after shutdown");
        }
    });
}
