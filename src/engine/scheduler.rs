//! Priority queue shared by every swarm of an engine
//!
//! This module handles:
//! - Ordering pending requests by nesting depth, then submission order
//! - Handing the highest-priority request to exactly one worker
//! - Dropping queued requests of swarms nobody consumes anymore
//! - Closing the queue on shutdown

use crate::request::{Request, SwarmId};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::{watch, Notify};

/// A request waiting in the queue
#[derive(Debug)]
struct QueueEntry(Request);

// Deeper nesting pops first (BinaryHeap is a max-heap); within a depth the
// lower sequence number pops first
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .nesting_depth()
            .cmp(&other.0.nesting_depth())
            .then_with(|| other.0.sequence().cmp(&self.0.sequence()))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

#[derive(Debug, Default)]
struct QueueState {
    heap: BinaryHeap<QueueEntry>,
    closed: bool,
}

/// Scheduler hands out pending requests in priority order
///
/// Entries compare first by nesting depth (deeper wins), then by sequence
/// (FIFO within a depth). Once an inner swarm's requests are exhausted the
/// remaining requests of the depth above keep their original relative order.
#[derive(Debug)]
pub struct Scheduler {
    state: Mutex<QueueState>,
    available: Notify,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    /// Creates an empty, open scheduler
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            shutdown,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // The heap is never left half-updated, so poisoning is harmless
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds a request to the queue
    ///
    /// Returns the request back if the scheduler is closed.
    pub fn submit(&self, request: Request) -> Result<(), Request> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(request);
            }
            tracing::trace!(
                "Queued {} (depth {}, attempt {})",
                request.url(),
                request.nesting_depth(),
                request.attempt()
            );
            state.heap.push(QueueEntry(request));
        }
        self.available.notify_one();
        Ok(())
    }

    /// Adds a whole batch atomically, so no worker can observe half of it
    ///
    /// Returns the batch back if the scheduler is closed.
    pub fn submit_all(&self, requests: Vec<Request>) -> Result<(), Vec<Request>> {
        if requests.is_empty() {
            return Ok(());
        }
        {
            let mut state = self.lock();
            if state.closed {
                return Err(requests);
            }
            tracing::trace!("Queued batch of {} requests", requests.len());
            state.heap.extend(requests.into_iter().map(QueueEntry));
        }
        self.available.notify_one();
        Ok(())
    }

    /// Waits until a request is queued
    ///
    /// Returns `false` once the scheduler is closed. Nothing is removed, so
    /// another worker may still win the request.
    pub async fn ready(&self) -> bool {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.lock();
                if state.closed {
                    return false;
                }
                if !state.heap.is_empty() {
                    return true;
                }
            }

            notified.await;
        }
    }

    /// Removes and returns the highest-priority request, if any
    ///
    /// Requests whose swarm has been dropped are discarded on the way.
    pub fn try_take(&self) -> Option<Request> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        while let Some(QueueEntry(request)) = state.heap.pop() {
            if request.is_abandoned() {
                tracing::trace!("Skipping {} of dropped {}", request.url(), request.swarm_id());
                continue;
            }
            let more = !state.heap.is_empty();
            drop(state);
            // Pass the wake-up along so idle workers drain a batch
            if more {
                self.available.notify_one();
            }
            return Some(request);
        }
        None
    }

    /// Removes and returns the highest-priority request
    ///
    /// Waits until a request is available. Returns `None` once the scheduler
    /// is closed.
    pub async fn take_next(&self) -> Option<Request> {
        while self.ready().await {
            if let Some(request) = self.try_take() {
                return Some(request);
            }
        }
        None
    }

    /// Drops every queued request of one swarm
    pub fn cancel(&self, swarm: SwarmId) -> usize {
        let mut state = self.lock();
        let before = state.heap.len();
        state.heap.retain(|QueueEntry(request)| request.swarm_id() != swarm);
        before - state.heap.len()
    }

    /// Closes the scheduler and returns everything still queued
    ///
    /// Waiting workers wake up and receive `None`; later submissions are
    /// rejected.
    pub fn close(&self) -> Vec<Request> {
        let drained = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.heap)
                .into_vec()
                .into_iter()
                .map(|QueueEntry(request)| request)
                .collect()
        };
        self.available.notify_waiters();
        self.shutdown.send_replace(true);
        drained
    }

    /// Resolves once the scheduler is closed
    pub async fn closed(&self) {
        let mut shutdown = self.shutdown.subscribe();
        // The sender lives as long as `self`, so this only errs on teardown
        let _ = shutdown.wait_for(|closed| *closed).await;
    }

    /// Returns the number of queued requests
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
