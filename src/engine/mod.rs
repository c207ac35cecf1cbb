//! Swarm execution engine
//!
//! This module contains the scheduling core, including:
//! - The priority queue shared by every swarm
//! - Global admission control (concurrency, spacing, rolling rate cap)
//! - The fixed worker pool that executes requests and routes retries
//! - The caller-facing [`Swarm`] and [`Each`] sequences
//! - Tracking which swarms each task is consuming, for automatic nesting
//!
//! An [`Engine`] owns all of these. It must be built inside a Tokio runtime,
//! since building it spawns the workers.

mod consumers;
mod scheduler;
mod swarm;
mod threshold;
mod worker;

pub use scheduler::Scheduler;
pub use swarm::{current_depth, with_depth, Each, Swarm};
pub use threshold::{Admission, RateWindow, ThresholdController, ThresholdLimits};

use crate::config::Config;
use crate::hooks::{PassThrough, ResponsePreprocessor, ShortCircuit};
use crate::request::{Payload, Request, SwarmId};
use crate::response::Response;
use crate::retry::{RetryPolicy, RetryStrategy};
use crate::transport::{HttpTransport, Transport};
use crate::RequestError;
use consumers::{Consumers, ContextKey};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// State shared by the engine handle, its workers and its swarms
pub(crate) struct Shared {
    pub(crate) scheduler: Scheduler,
    pub(crate) threshold: ThresholdController,
    pub(crate) retry: Arc<dyn RetryPolicy>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) preprocessor: Arc<dyn ResponsePreprocessor>,
    pub(crate) consumers: Consumers,
    short_circuit: Option<Arc<dyn ShortCircuit>>,
    next_sequence: AtomicU64,
    next_swarm: AtomicU64,
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("scheduler", &self.scheduler)
            .field("threshold", &self.threshold)
            .field("retry", &self.retry)
            .field("transport", &self.transport)
            .field("preprocessor", &self.preprocessor)
            .field("short_circuit", &self.short_circuit)
            .finish_non_exhaustive()
    }
}

impl Shared {
    /// Depth for a swarm opened from the calling context
    ///
    /// One below the deepest swarm this context is part-way through, or the
    /// enclosing [`with_depth`] scope if that is deeper.
    pub(crate) fn nesting_depth(&self) -> u32 {
        let consuming = self
            .consumers
            .deepest(ContextKey::current())
            .map_or(0, |depth| depth + 1);
        consuming.max(current_depth())
    }

    /// Creates a swarm at `depth` and queues all of its requests at once
    ///
    /// Payloads the short circuit answers resolve immediately and are never
    /// queued.
    pub(crate) fn open_swarm(
        self: &Arc<Self>,
        payloads: Vec<Payload>,
        maintain_order: bool,
        depth: u32,
    ) -> Swarm {
        let id = SwarmId(self.next_swarm.fetch_add(1, Ordering::Relaxed) + 1);
        let total = payloads.len();
        let base = self.next_sequence.fetch_add(total as u64, Ordering::Relaxed);
        let (sink, results) = mpsc::unbounded_channel();

        let mut requests = Vec::with_capacity(total);
        for (index, payload) in payloads.into_iter().enumerate() {
            let answer = self
                .short_circuit
                .as_ref()
                .and_then(|hook| hook.answer(&payload));
            let request = Request::new(payload, index, depth, base + index as u64, id, sink.clone());
            match answer {
                Some(raw) => request.deliver(Ok(Response::new(raw, 0))),
                None => requests.push(request),
            }
        }
        drop(sink);

        tracing::debug!(
            "Opened {} with {} requests ({} answered early) at depth {} ({})",
            id,
            total,
            total - requests.len(),
            depth,
            if maintain_order { "ordered" } else { "unordered" }
        );

        // Rejected requests resolve as shutdowns when dropped
        if let Err(rejected) = self.scheduler.submit_all(requests) {
            tracing::warn!("{} opened after shutdown; {} requests rejected", id, rejected.len());
        }

        Swarm::new(id, depth, total, maintain_order, results, Arc::clone(self))
    }
}

/// Builder for an [`Engine`]
///
/// # Example
///
/// ```no_run
/// use swarm_requests::{Engine, HttpTransport, RetryStrategy, ThresholdLimits};
/// use swarm_requests::config::UserAgentConfig;
///
/// # async fn run() -> swarm_requests::Result<()> {
/// let transport = HttpTransport::new(&UserAgentConfig::default(), None)?;
/// let engine = Engine::builder(transport)
///     .threshold(ThresholdLimits::big_server())
///     .retry_policy(RetryStrategy::big_scrape())
///     .build();
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct EngineBuilder {
    transport: Arc<dyn Transport>,
    threshold: ThresholdLimits,
    retry: Arc<dyn RetryPolicy>,
    preprocessor: Arc<dyn ResponsePreprocessor>,
    short_circuit: Option<Arc<dyn ShortCircuit>>,
    workers: Option<usize>,
}

impl EngineBuilder {
    fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            threshold: ThresholdLimits::default(),
            retry: Arc::new(RetryStrategy::default()),
            preprocessor: Arc::new(PassThrough),
            short_circuit: None,
            workers: None,
        }
    }

    /// Starts an HTTP engine builder from a loaded configuration
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        let transport = HttpTransport::new(&config.user_agent, config.timeout())?;
        let mut builder = Self::new(Arc::new(transport))
            .threshold(config.threshold_limits()?)
            .retry_policy(config.retry_strategy()?);
        if let Some(workers) = config.worker_count() {
            builder = builder.workers(workers);
        }
        Ok(builder)
    }

    /// Sets the global concurrency and rate limits
    pub fn threshold(mut self, limits: ThresholdLimits) -> Self {
        self.threshold = limits;
        self
    }

    /// Sets the retry policy applied to every request
    pub fn retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry = Arc::new(policy);
        self
    }

    /// Sets the default preprocessor for every swarm
    pub fn preprocessor(mut self, preprocessor: impl ResponsePreprocessor + 'static) -> Self {
        self.preprocessor = Arc::new(preprocessor);
        self
    }

    /// Lets `hook` answer payloads before they are queued
    pub fn short_circuit(mut self, hook: impl ShortCircuit + 'static) -> Self {
        self.short_circuit = Some(Arc::new(hook));
        self
    }

    /// Sets the number of workers (defaults to the threshold's max in flight)
    pub fn workers(mut self, count: usize) -> Self {
        self.workers = Some(count.max(1));
        self
    }

    /// Builds the engine and starts its workers on the current runtime
    pub fn build(self) -> Engine {
        let worker_count = self
            .workers
            .unwrap_or(self.threshold.max_in_flight)
            .max(1);

        tracing::info!(
            "Starting engine with {} workers (max in flight {}, min interval {:?})",
            worker_count,
            self.threshold.max_in_flight,
            self.threshold.min_interval
        );

        let shared = Arc::new(Shared {
            scheduler: Scheduler::new(),
            threshold: ThresholdController::new(self.threshold),
            retry: self.retry,
            transport: self.transport,
            preprocessor: self.preprocessor,
            consumers: Consumers::default(),
            short_circuit: self.short_circuit,
            next_sequence: AtomicU64::new(0),
            next_swarm: AtomicU64::new(0),
        });
        let workers = worker::spawn_workers(&shared, worker_count);

        Engine {
            shared,
            worker_count,
            workers: Mutex::new(workers),
        }
    }
}

/// Runs swarms of requests on a bounded worker pool
///
/// Dropping the engine stops it without killing requests already executing.
#[derive(Debug)]
pub struct Engine {
    shared: Arc<Shared>,
    worker_count: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Starts building an engine around `transport`
    pub fn builder(transport: impl Transport + 'static) -> EngineBuilder {
        EngineBuilder::new(Arc::new(transport))
    }

    /// Builds an HTTP engine from a loaded configuration
    pub fn from_config(config: &Config) -> crate::Result<Self> {
        Ok(EngineBuilder::from_config(config)?.build())
    }

    /// Sends one payload and waits for its terminal outcome
    ///
    /// The request is queued one level deeper than the calling context, so a
    /// blocking call made while consuming a swarm jumps ahead of it.
    pub async fn one(&self, payload: impl Into<Payload>) -> Result<Response, RequestError> {
        let payload = payload.into();
        let url = payload.url().to_string();
        Self::finish_one(self.open_one(payload), url).await
    }

    /// Like [`one`](Self::one), with its own preprocessor
    pub async fn one_with(
        &self,
        payload: impl Into<Payload>,
        preprocessor: impl ResponsePreprocessor + 'static,
    ) -> Result<Response, RequestError> {
        let payload = payload.into();
        let url = payload.url().to_string();
        let swarm = self.open_one(payload).with_preprocessor(preprocessor);
        Self::finish_one(swarm, url).await
    }

    fn open_one(&self, payload: Payload) -> Swarm {
        let depth = self.shared.nesting_depth() + 1;
        self.shared.open_swarm(vec![payload], true, depth)
    }

    async fn finish_one(mut swarm: Swarm, url: String) -> Result<Response, RequestError> {
        match swarm.next().await {
            Some(outcome) => outcome,
            None => Err(RequestError::Shutdown { url }),
        }
    }

    /// Queues every payload and returns the lazy sequence of their outcomes
    ///
    /// Opened while another swarm is part-way consumed in the same task, the
    /// new swarm is nested below it.
    pub fn swarm<I>(&self, payloads: I, maintain_order: bool) -> Swarm
    where
        I: IntoIterator,
        I::Item: Into<Payload>,
    {
        let payloads = payloads.into_iter().map(Into::into).collect();
        let depth = self.shared.nesting_depth();
        self.shared.open_swarm(payloads, maintain_order, depth)
    }

    /// Like [`swarm`](Self::swarm), pairing each outcome with its item
    pub fn each<T, F>(&self, items: Vec<T>, mut to_payload: F, maintain_order: bool) -> Each<T>
    where
        F: FnMut(&T) -> Payload,
    {
        let payloads = items.iter().map(&mut to_payload).collect();
        let depth = self.shared.nesting_depth();
        let swarm = self.shared.open_swarm(payloads, maintain_order, depth);
        Each::new(swarm, items)
    }

    /// Stops the engine
    ///
    /// Queued and retry-waiting requests resolve to
    /// [`RequestError::Shutdown`]. Requests already executing finish
    /// normally unless `kill_executing` is set, in which case the workers
    /// are aborted and those requests resolve to a shutdown as well.
    pub fn stop(&self, kill_executing: bool) {
        if self.shared.scheduler.is_closed() && !kill_executing {
            return;
        }

        let drained = self.shared.scheduler.close();
        self.shared.threshold.close();
        tracing::info!("Stopping engine; {} queued requests cancelled", drained.len());
        drop(drained);

        if kill_executing {
            let workers = self
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for handle in workers.iter() {
                handle.abort();
            }
        }
    }

    /// Stops the engine and waits until every worker has exited
    pub async fn shutdown(&self, kill_executing: bool) {
        self.stop(kill_executing);
        let workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for handle in workers {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::error!("Worker panicked: {}", e);
                }
            }
        }
        tracing::info!("Engine stopped");
    }

    /// Number of admitted, unfinished requests
    pub fn in_flight(&self) -> usize {
        self.shared.threshold.in_flight()
    }

    /// Number of requests waiting in the queue
    pub fn pending(&self) -> usize {
        self.shared.scheduler.len()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn limits(&self) -> &ThresholdLimits {
        self.shared.threshold.limits()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.scheduler.is_closed()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop(false);
    }
}
