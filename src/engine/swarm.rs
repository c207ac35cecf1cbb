//! Caller-facing result sequences
//!
//! A [`Swarm`] is a lazy, finite, single-pass sequence of outcomes for one
//! batch of payloads. In ordered mode it buffers early completions until the
//! contiguous prefix is ready; in unordered mode it yields in completion
//! order. An abandoned request yields an error at its own position and never
//! ends the sequence early.
//!
//! # Nesting
//!
//! Requests from a swarm created while consuming another swarm's results
//! run before that outer swarm's remaining requests. The engine notices
//! which swarms each task is part-way through, so a plain `while let` loop
//! nests just like [`Swarm::consume`]. A depth can also be given explicitly,
//! with [`with_depth`] or [`Swarm::nested`].

use super::consumers::ContextKey;
use super::Shared;
use crate::hooks::ResponsePreprocessor;
use crate::request::{Delivery, Outcome, Payload, SwarmId};
use crate::response::Response;
use crate::RequestError;
use futures::Stream;
use std::collections::{BTreeMap, VecDeque};
use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::sync::mpsc;

tokio::task_local! {
    static CONSUMPTION_DEPTH: u32;
}

/// Returns the nesting depth set by the innermost [`with_depth`] scope
///
/// Zero outside of any such scope. [`Swarm::consume`] runs its callback in
/// one.
pub fn current_depth() -> u32 {
    CONSUMPTION_DEPTH.try_with(|depth| *depth).unwrap_or(0)
}

/// Runs `future` with swarms created inside it nested at `depth`
pub async fn with_depth<F: Future>(depth: u32, future: F) -> F::Output {
    CONSUMPTION_DEPTH.scope(depth, future).await
}

/// Holds completed outcomes until they may be emitted
#[derive(Debug)]
enum Buffer {
    Ordered {
        cursor: usize,
        pending: BTreeMap<usize, Outcome>,
    },
    Unordered(VecDeque<Delivery>),
}

impl Buffer {
    fn new(maintain_order: bool) -> Self {
        if maintain_order {
            Self::Ordered {
                cursor: 0,
                pending: BTreeMap::new(),
            }
        } else {
            Self::Unordered(VecDeque::new())
        }
    }

    fn push(&mut self, index: usize, outcome: Outcome) {
        match self {
            Self::Ordered { pending, .. } => {
                pending.insert(index, outcome);
            }
            Self::Unordered(queue) => queue.push_back((index, outcome)),
        }
    }

    fn pop_ready(&mut self) -> Option<Delivery> {
        match self {
            Self::Ordered { cursor, pending } => {
                let outcome = pending.remove(cursor)?;
                let index = *cursor;
                *cursor += 1;
                Some((index, outcome))
            }
            Self::Unordered(queue) => queue.pop_front(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Ordered { pending, .. } => pending.len(),
            Self::Unordered(queue) => queue.len(),
        }
    }
}

/// Lazy sequence of outcomes for one batch of payloads
///
/// Every outcome passes through the swarm's [`ResponsePreprocessor`] on its
/// way out; by default that is the engine's.
///
/// Dropping a swarm before it is exhausted removes its queued requests and
/// stops further retries. Requests already in flight run to completion and
/// their outcomes are discarded.
#[derive(Debug)]
pub struct Swarm {
    id: SwarmId,
    depth: u32,
    total: usize,
    emitted: usize,
    buffer: Buffer,
    results: mpsc::UnboundedReceiver<Delivery>,
    preprocessor: Arc<dyn ResponsePreprocessor>,
    consumer: Option<ContextKey>,
    shared: Arc<Shared>,
}

impl Swarm {
    pub(crate) fn new(
        id: SwarmId,
        depth: u32,
        total: usize,
        maintain_order: bool,
        results: mpsc::UnboundedReceiver<Delivery>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            id,
            depth,
            total,
            emitted: 0,
            buffer: Buffer::new(maintain_order),
            results,
            preprocessor: Arc::clone(&shared.preprocessor),
            consumer: None,
            shared,
        }
    }

    /// Replaces the engine's preprocessor for this swarm only
    pub fn with_preprocessor(mut self, preprocessor: impl ResponsePreprocessor + 'static) -> Self {
        self.preprocessor = Arc::new(preprocessor);
        self
    }

    pub fn id(&self) -> SwarmId {
        self.id
    }

    /// Nesting depth this swarm's requests were queued at
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Total number of payloads in this swarm
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Number of outcomes not yet emitted
    pub fn remaining(&self) -> usize {
        self.total - self.emitted
    }

    pub fn is_ordered(&self) -> bool {
        matches!(self.buffer, Buffer::Ordered { .. })
    }

    /// Waits for the next outcome; `None` once every position was emitted
    pub async fn next(&mut self) -> Option<Result<Response, RequestError>> {
        self.next_indexed().await.map(|(_, outcome)| outcome)
    }

    /// Like [`next`](Self::next), but also returns the input position
    pub async fn next_indexed(&mut self) -> Option<(usize, Result<Response, RequestError>)> {
        poll_fn(|cx| self.poll_next_indexed(cx)).await
    }

    fn poll_next_indexed(&mut self, cx: &mut Context<'_>) -> Poll<Option<Delivery>> {
        loop {
            if self.emitted == self.total {
                return Poll::Ready(None);
            }

            if let Some((index, outcome)) = self.buffer.pop_ready() {
                self.emitted += 1;
                self.track_consumer();
                return Poll::Ready(Some((index, self.preprocessor.process(outcome))));
            }

            match ready!(self.results.poll_recv(cx)) {
                Some((index, outcome)) => self.buffer.push(index, outcome),
                None => {
                    tracing::warn!(
                        "{} ended with {} of {} outcomes missing",
                        self.id,
                        self.total - self.emitted - self.buffer.len(),
                        self.total
                    );
                    self.emitted = self.total;
                    self.untrack_consumer();
                    return Poll::Ready(None);
                }
            }
        }
    }

    /// Marks this swarm as being consumed by the polling context until it
    /// is exhausted
    fn track_consumer(&mut self) {
        if self.emitted == self.total {
            self.untrack_consumer();
            return;
        }
        let here = ContextKey::current();
        if self.consumer != Some(here) {
            self.untrack_consumer();
            self.shared.consumers.enter(here, self.id, self.depth);
            self.consumer = Some(here);
        }
    }

    fn untrack_consumer(&mut self) {
        if let Some(context) = self.consumer.take() {
            self.shared.consumers.leave(context, self.id);
        }
    }

    /// Starts a swarm nested one level below this one
    ///
    /// Its requests run before this swarm's remaining requests.
    pub fn nested<I>(&self, payloads: I, maintain_order: bool) -> Swarm
    where
        I: IntoIterator,
        I::Item: Into<Payload>,
    {
        let payloads = payloads.into_iter().map(Into::into).collect();
        self.shared.open_swarm(payloads, maintain_order, self.depth + 1)
    }

    /// Feeds every outcome to `f`, awaiting each callback in turn
    ///
    /// Swarms created through the engine inside `f` are nested below this
    /// one automatically.
    pub async fn consume<F, Fut>(mut self, mut f: F)
    where
        F: FnMut(Result<Response, RequestError>) -> Fut,
        Fut: Future<Output = ()>,
    {
        let depth = self.depth + 1;
        while let Some(outcome) = self.next().await {
            with_depth(depth, f(outcome)).await;
        }
    }
}

impl Stream for Swarm {
    type Item = Result<Response, RequestError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.poll_next_indexed(cx)
            .map(|delivery| delivery.map(|(_, outcome)| outcome))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl Drop for Swarm {
    fn drop(&mut self) {
        self.untrack_consumer();
        if self.emitted < self.total {
            let cancelled = self.shared.scheduler.cancel(self.id);
            tracing::debug!(
                "{} dropped with {} outcomes unconsumed; {} queued requests cancelled",
                self.id,
                self.total - self.emitted,
                cancelled
            );
        }
    }
}

/// A swarm whose outcomes are paired with caller-supplied items
#[derive(Debug)]
pub struct Each<T> {
    swarm: Swarm,
    items: Vec<Option<T>>,
}

impl<T> Each<T> {
    pub(crate) fn new(swarm: Swarm, items: Vec<T>) -> Self {
        Self {
            swarm,
            items: items.into_iter().map(Some).collect(),
        }
    }

    /// Waits for the next `(item, outcome)` pair
    pub async fn next(&mut self) -> Option<(T, Result<Response, RequestError>)> {
        poll_fn(|cx| self.poll_pair(cx)).await
    }

    fn poll_pair(&mut self, cx: &mut Context<'_>) -> Poll<Option<(T, Outcome)>> {
        loop {
            match ready!(self.swarm.poll_next_indexed(cx)) {
                Some((index, outcome)) => {
                    if let Some(item) = self.items.get_mut(index).and_then(Option::take) {
                        return Poll::Ready(Some((item, outcome)));
                    }
                }
                None => return Poll::Ready(None),
            }
        }
    }

    /// Replaces the engine's preprocessor for these outcomes only
    pub fn with_preprocessor(mut self, preprocessor: impl ResponsePreprocessor + 'static) -> Self {
        self.swarm = self.swarm.with_preprocessor(preprocessor);
        self
    }

    /// The underlying swarm
    pub fn swarm(&self) -> &Swarm {
        &self.swarm
    }

    pub fn remaining(&self) -> usize {
        self.swarm.remaining()
    }
}

// Items are only moved out, never pinned
impl<T> Unpin for Each<T> {}

impl<T> Stream for Each<T> {
    type Item = (T, Result<Response, RequestError>);

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.poll_pair(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.swarm.size_hint()
    }
}
