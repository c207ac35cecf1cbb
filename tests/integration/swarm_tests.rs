//! Integration tests for the swarm engine
//!
//! These tests drive the engine with a scripted in-process transport that
//! records dispatch order and concurrency, so ordering, priority, retry and
//! shutdown behaviour can be checked without a network.

use futures::StreamExt;
use reqwest::StatusCode;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swarm_requests::engine::current_depth;
use swarm_requests::{
    Engine, FailureKind, Payload, RawResponse, RetryStrategy, ThresholdLimits, Transport,
    TransportError,
};

/// One scripted answer
#[derive(Debug, Clone)]
enum Step {
    Status(u16),
    Fail(TransportError),
}

#[derive(Debug, Default)]
struct Route {
    delay: Duration,
    steps: VecDeque<Step>,
}

#[derive(Debug, Default)]
struct ScriptState {
    routes: Mutex<HashMap<String, Route>>,
    dispatched: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Answers each URL with its script, then with 200 once the script runs out
#[derive(Debug, Clone, Default)]
struct ScriptedTransport {
    state: Arc<ScriptState>,
}

const DEFAULT_DELAY: Duration = Duration::from_millis(10);

impl ScriptedTransport {
    fn route(&self, url: &str, delay: Duration, steps: Vec<Step>) {
        self.state.routes.lock().unwrap().insert(
            url.to_string(),
            Route {
                delay,
                steps: steps.into(),
            },
        );
    }

    fn dispatched(&self) -> Vec<String> {
        self.state.dispatched.lock().unwrap().clone()
    }

    fn calls(&self, url: &str) -> usize {
        self.dispatched().iter().filter(|u| *u == url).count()
    }

    fn peak(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }
}

/// Tracks how many executions overlap
struct ActiveGuard<'a>(&'a ScriptState);

impl<'a> ActiveGuard<'a> {
    fn enter(state: &'a ScriptState) -> Self {
        let now = state.active.fetch_add(1, Ordering::SeqCst) + 1;
        state.peak.fetch_max(now, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, payload: &Payload) -> Result<RawResponse, TransportError> {
        let url = payload.url().to_string();
        self.state.dispatched.lock().unwrap().push(url.clone());
        let _active = ActiveGuard::enter(&self.state);

        let (delay, step) = {
            let mut routes = self.state.routes.lock().unwrap();
            match routes.get_mut(&url) {
                Some(route) => (route.delay, route.steps.pop_front()),
                None => (DEFAULT_DELAY, None),
            }
        };

        tokio::time::sleep(delay).await;

        match step.unwrap_or(Step::Status(200)) {
            Step::Status(code) => Ok(RawResponse::new(
                url.clone(),
                StatusCode::from_u16(code).unwrap(),
                url.into_bytes(),
            )),
            Step::Fail(e) => Err(e),
        }
    }
}

fn create_test_engine(transport: &ScriptedTransport, limits: ThresholdLimits) -> Engine {
    Engine::builder(transport.clone())
        .threshold(limits)
        .retry_policy(RetryStrategy::none())
        .build()
}

fn urls(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("http://x/{}{}", prefix, i)).collect()
}

fn position(log: &[String], url: &str) -> usize {
    log.iter()
        .position(|u| u == url)
        .unwrap_or_else(|| panic!("{} was never dispatched", url))
}

#[tokio::test]
async fn test_ordered_output_under_inverted_latencies() {
    let transport = ScriptedTransport::default();
    let input = urls("o", 5);
    for (i, url) in input.iter().enumerate() {
        // Earlier inputs are slower
        transport.route(url, Duration::from_millis(20 * (5 - i as u64)), vec![]);
    }
    let engine = create_test_engine(&transport, ThresholdLimits::unpaced(5));

    let mut swarm = engine.swarm(&input, true);
    let mut output = Vec::new();
    while let Some(outcome) = swarm.next().await {
        output.push(outcome.unwrap().url().to_string());
    }

    assert_eq!(output, input);
}

#[tokio::test]
async fn test_unordered_yields_fastest_first() {
    let transport = ScriptedTransport::default();
    transport.route("http://x/u1", Duration::from_millis(120), vec![]);
    transport.route("http://x/u2", Duration::from_millis(5), vec![]);
    transport.route("http://x/u3", Duration::from_millis(60), vec![]);
    let engine = create_test_engine(&transport, ThresholdLimits::unpaced(3));

    let swarm = engine.swarm(["http://x/u1", "http://x/u2", "http://x/u3"], false);
    let output: Vec<String> = swarm
        .map(|outcome| outcome.unwrap().url().to_string())
        .collect()
        .await;

    assert_eq!(output[0], "http://x/u2");
    let seen: HashSet<_> = output.iter().cloned().collect();
    let expected: HashSet<_> = ["http://x/u1", "http://x/u2", "http://x/u3"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(seen, expected);
}

#[tokio::test(start_paused = true)]
async fn test_api_preset_succeeds_after_two_retries() {
    let transport = ScriptedTransport::default();
    transport.route(
        "http://x/login",
        DEFAULT_DELAY,
        vec![
            Step::Fail(TransportError::Timeout),
            Step::Status(503),
            Step::Status(200),
        ],
    );
    let engine = Engine::builder(transport.clone())
        .threshold(ThresholdLimits::unpaced(2))
        .retry_policy(RetryStrategy::api())
        .build();

    let response = engine.one("http://x/login").await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.attempts(), 3);
    assert_eq!(transport.calls("http://x/login"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_policy_exhausted_carries_last_failure() {
    let transport = ScriptedTransport::default();
    transport.route(
        "http://x/flaky",
        DEFAULT_DELAY,
        vec![Step::Status(503), Step::Status(502), Step::Status(504)],
    );
    let engine = Engine::builder(transport.clone())
        .threshold(ThresholdLimits::unpaced(1))
        .retry_policy(RetryStrategy::api())
        .build();

    let err = engine.one("http://x/flaky").await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::PolicyExhausted);
    assert_eq!(err.status(), Some(504));
    assert_eq!(transport.calls("http://x/flaky"), 3);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let transport = ScriptedTransport::default();
    transport.route("http://x/missing", DEFAULT_DELAY, vec![Step::Status(404)]);
    let engine = Engine::builder(transport.clone())
        .threshold(ThresholdLimits::unpaced(1))
        .retry_policy(RetryStrategy::big_scrape())
        .build();

    let err = engine.one("http://x/missing").await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::Permanent);
    assert_eq!(transport.calls("http://x/missing"), 1);
}

#[tokio::test]
async fn test_failure_is_local_to_its_position() {
    let transport = ScriptedTransport::default();
    transport.route("http://x/f1", DEFAULT_DELAY, vec![Step::Status(404)]);
    transport.route(
        "http://x/f3",
        DEFAULT_DELAY,
        vec![Step::Fail(TransportError::InvalidRequest("bad".to_string()))],
    );
    let engine = create_test_engine(&transport, ThresholdLimits::unpaced(4));

    let mut swarm = engine.swarm(urls("f", 5), true);
    let mut kinds = Vec::new();
    while let Some(outcome) = swarm.next().await {
        kinds.push(outcome.map(|_| ()).map_err(|e| e.kind()));
    }

    assert_eq!(
        kinds,
        vec![
            Ok(()),
            Err(FailureKind::Permanent),
            Ok(()),
            Err(FailureKind::Permanent),
            Ok(()),
        ]
    );
    assert_eq!(engine.in_flight(), 0);
}

#[tokio::test]
async fn test_concurrency_limit_never_exceeded() {
    let transport = ScriptedTransport::default();
    let input = urls("c", 24);
    for url in &input {
        transport.route(url, Duration::from_millis(15), vec![]);
    }
    // More workers than slots: admission, not the pool, is the bound
    let engine = Engine::builder(transport.clone())
        .threshold(ThresholdLimits::unpaced(3))
        .workers(8)
        .retry_policy(RetryStrategy::none())
        .build();

    let results: Vec<_> = engine.swarm(&input, false).collect().await;

    assert_eq!(results.len(), 24);
    assert!(results.iter().all(|r| r.is_ok()));
    assert!(transport.peak() <= 3, "peak was {}", transport.peak());
    assert_eq!(engine.in_flight(), 0);
}

#[tokio::test]
async fn test_nested_swarm_runs_before_outer_remainder() {
    let transport = ScriptedTransport::default();
    let engine = create_test_engine(&transport, ThresholdLimits::unpaced(1));
    let inner_urls = urls("i", 3);

    let outer = engine.swarm(urls("o", 6), true);
    let engine_ref = &engine;
    let inner_urls_ref = &inner_urls;
    outer
        .consume(move |outcome| async move {
            let response = outcome.unwrap();
            if response.url() == "http://x/o0" {
                assert_eq!(current_depth(), 1);
                let inner = engine_ref.swarm(inner_urls_ref, true);
                assert_eq!(inner.depth(), 1);
                let results: Vec<_> = inner.collect().await;
                assert!(results.iter().all(|r| r.is_ok()));
            }
        })
        .await;

    let log = transport.dispatched();
    assert_eq!(log.len(), 9);

    let first_inner = position(&log, "http://x/i0");
    assert_eq!(&log[first_inner..first_inner + 3], &inner_urls[..]);
    assert!(position(&log, "http://x/i2") < position(&log, "http://x/o2"));
}

#[tokio::test]
async fn test_priority_holds_across_three_levels() {
    let transport = ScriptedTransport::default();
    let engine = create_test_engine(&transport, ThresholdLimits::unpaced(1));
    let engine_ref = &engine;

    let outer = engine.swarm(urls("a", 4), true);
    outer
        .consume(move |outcome| async move {
            if outcome.unwrap().url() != "http://x/a0" {
                return;
            }
            let middle = engine_ref.swarm(urls("b", 4), true);
            assert_eq!(middle.depth(), 1);
            middle
                .consume(move |outcome| async move {
                    if outcome.unwrap().url() != "http://x/b0" {
                        return;
                    }
                    assert_eq!(current_depth(), 2);
                    let inner = engine_ref.swarm(urls("c", 3), true);
                    assert_eq!(inner.depth(), 2);
                    let results: Vec<_> = inner.collect().await;
                    assert_eq!(results.len(), 3);
                })
                .await;
        })
        .await;

    let log = transport.dispatched();
    assert_eq!(log.len(), 11);

    let first_inner = position(&log, "http://x/c0");
    assert_eq!(&log[first_inner..first_inner + 3], &urls("c", 3)[..]);
    assert!(position(&log, "http://x/c2") < position(&log, "http://x/b2"));
    assert!(position(&log, "http://x/b3") < position(&log, "http://x/a2"));
}

#[tokio::test]
async fn test_swarm_opened_in_plain_loop_is_nested() {
    let transport = ScriptedTransport::default();
    let engine = create_test_engine(&transport, ThresholdLimits::unpaced(1));

    let mut outer = engine.swarm(urls("o", 5), true);
    while let Some(outcome) = outer.next().await {
        if outcome.unwrap().url() == "http://x/o0" {
            let mut inner = engine.swarm(urls("i", 2), true);
            assert_eq!(inner.depth(), 1);
            while let Some(result) = inner.next().await {
                result.unwrap();
            }
        }
    }

    let log = transport.dispatched();
    assert_eq!(log.len(), 7);
    assert!(position(&log, "http://x/i1") < position(&log, "http://x/o3"));
}

#[tokio::test(start_paused = true)]
async fn test_nested_swarm_preempts_paced_outer_requests() {
    let transport = ScriptedTransport::default();
    // Two slots, 150ms apart, so workers spend most of their time pacing
    let engine = Engine::builder(transport.clone())
        .threshold(ThresholdLimits::default())
        .workers(2)
        .retry_policy(RetryStrategy::none())
        .build();
    let engine_ref = &engine;

    engine
        .swarm(urls("o", 5), true)
        .consume(move |outcome| async move {
            if outcome.unwrap().url() == "http://x/o0" {
                let inner: Vec<_> = engine_ref.swarm(urls("i", 2), true).collect().await;
                assert!(inner.iter().all(|r| r.is_ok()));
            }
        })
        .await;

    let log = transport.dispatched();
    assert_eq!(log.len(), 7);
    assert_eq!(&log[..3], &["http://x/o0", "http://x/i0", "http://x/i1"]);
}

#[tokio::test]
async fn test_explicit_nesting_takes_priority() {
    let transport = ScriptedTransport::default();
    let engine = create_test_engine(&transport, ThresholdLimits::unpaced(1));

    let mut outer = engine.swarm(urls("p", 5), true);
    outer.next().await.unwrap().unwrap();

    let inner = outer.nested(urls("q", 2), true);
    assert_eq!(inner.depth(), outer.depth() + 1);
    let _: Vec<_> = inner.collect().await;
    while outer.next().await.is_some() {}

    let log = transport.dispatched();
    assert!(position(&log, "http://x/q1") < position(&log, "http://x/p3"));
}

#[tokio::test]
async fn test_sibling_swarms_are_fifo() {
    let transport = ScriptedTransport::default();
    let engine = create_test_engine(&transport, ThresholdLimits::unpaced(1));

    let first = engine.swarm(urls("s", 3), true);
    let second = engine.swarm(urls("t", 3), true);
    let (a, b) = futures::join!(
        first.collect::<Vec<_>>(),
        second.collect::<Vec<_>>()
    );
    assert_eq!(a.len() + b.len(), 6);

    let log = transport.dispatched();
    let mut expected = urls("s", 3);
    expected.extend(urls("t", 3));
    assert_eq!(log, expected);
}

#[tokio::test]
async fn test_one_inside_consume_jumps_the_queue() {
    let transport = ScriptedTransport::default();
    let engine = create_test_engine(&transport, ThresholdLimits::unpaced(1));
    let engine_ref = &engine;

    engine
        .swarm(urls("r", 5), true)
        .consume(move |outcome| async move {
            if outcome.unwrap().url() == "http://x/r0" {
                let detail = engine_ref.one("http://x/detail").await.unwrap();
                assert_eq!(detail.url(), "http://x/detail");
            }
        })
        .await;

    let log = transport.dispatched();
    assert!(position(&log, "http://x/detail") < position(&log, "http://x/r2"));
}

#[tokio::test]
async fn test_stop_resolves_queued_requests_as_shutdown() {
    let transport = ScriptedTransport::default();
    let input = urls("h", 4);
    for url in &input {
        transport.route(url, Duration::from_millis(150), vec![]);
    }
    let engine = create_test_engine(&transport, ThresholdLimits::unpaced(1));

    let mut swarm = engine.swarm(&input, true);
    tokio::time::sleep(Duration::from_millis(40)).await;
    engine.stop(false);

    // The request already executing finishes normally
    assert!(swarm.next().await.unwrap().is_ok());
    for _ in 1..4 {
        let err = swarm.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind(), FailureKind::Shutdown);
    }
    assert!(swarm.next().await.is_none());
    assert_eq!(transport.dispatched().len(), 1);
}

#[tokio::test]
async fn test_stop_killing_executing_requests() {
    let transport = ScriptedTransport::default();
    let input = urls("k", 3);
    for url in &input {
        transport.route(url, Duration::from_secs(5), vec![]);
    }
    let engine = create_test_engine(&transport, ThresholdLimits::unpaced(2));

    let mut swarm = engine.swarm(&input, false);
    tokio::time::sleep(Duration::from_millis(40)).await;
    engine.stop(true);

    let outcomes = tokio::time::timeout(Duration::from_secs(1), async {
        let mut kinds = Vec::new();
        while let Some(outcome) = swarm.next().await {
            kinds.push(outcome.unwrap_err().kind());
        }
        kinds
    })
    .await
    .expect("killed requests never resolved");

    assert_eq!(outcomes, vec![FailureKind::Shutdown; 3]);
}

#[tokio::test]
async fn test_stop_cancels_retry_waits() {
    let transport = ScriptedTransport::default();
    transport.route("http://x/down", DEFAULT_DELAY, vec![Step::Status(503)]);
    // The strict preset waits two seconds before retrying
    let engine = Engine::builder(transport.clone())
        .threshold(ThresholdLimits::unpaced(1))
        .retry_policy(RetryStrategy::strict())
        .build();

    let mut swarm = engine.swarm(["http://x/down"], true);
    tokio::time::sleep(Duration::from_millis(60)).await;
    engine.stop(false);

    let err = tokio::time::timeout(Duration::from_secs(1), swarm.next())
        .await
        .expect("retry wait was not cancelled")
        .unwrap()
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::Shutdown);
    assert_eq!(transport.calls("http://x/down"), 1);
}

#[tokio::test]
async fn test_dropping_engine_stops_it() {
    let transport = ScriptedTransport::default();
    let input = urls("e", 3);
    for url in &input {
        transport.route(url, Duration::from_millis(100), vec![]);
    }
    let engine = create_test_engine(&transport, ThresholdLimits::unpaced(1));
    let mut swarm = engine.swarm(&input, true);
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(engine);

    assert!(swarm.next().await.unwrap().is_ok());
    assert_eq!(
        swarm.next().await.unwrap().unwrap_err().kind(),
        FailureKind::Shutdown
    );
}

#[tokio::test]
async fn test_dropped_swarm_stops_dispatching() {
    let transport = ScriptedTransport::default();
    let engine = create_test_engine(&transport, ThresholdLimits::unpaced(1));

    let mut swarm = engine.swarm(urls("d", 10), true);
    swarm.next().await.unwrap().unwrap();
    drop(swarm);

    tokio::time::sleep(Duration::from_millis(80)).await;
    // At most the one request taken while the first result was delivered
    assert!(transport.dispatched().len() <= 2);
    assert_eq!(engine.pending(), 0);

    // The engine keeps serving other swarms
    let response = engine.one("http://x/after").await.unwrap();
    assert_eq!(response.url(), "http://x/after");
}

#[tokio::test(start_paused = true)]
async fn test_dropped_swarm_skips_pending_retry() {
    let transport = ScriptedTransport::default();
    transport.route("http://x/flaky", DEFAULT_DELAY, vec![Step::Status(503)]);
    // The strict preset waits two seconds before retrying
    let engine = Engine::builder(transport.clone())
        .threshold(ThresholdLimits::unpaced(1))
        .retry_policy(RetryStrategy::strict())
        .build();

    let swarm = engine.swarm(["http://x/flaky"], true);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.calls("http://x/flaky"), 1);
    drop(swarm);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.calls("http://x/flaky"), 1);
    assert_eq!(engine.pending(), 0);
}

#[tokio::test]
async fn test_each_pairs_items_with_outcomes() {
    #[derive(Debug, PartialEq)]
    struct Job {
        id: u32,
    }

    let transport = ScriptedTransport::default();
    transport.route("http://x/job/2", DEFAULT_DELAY, vec![Step::Status(410)]);
    let engine = create_test_engine(&transport, ThresholdLimits::unpaced(3));

    let jobs: Vec<Job> = (0..4).map(|id| Job { id }).collect();
    let mut each = engine.each(
        jobs,
        |job| Payload::get(format!("http://x/job/{}", job.id)),
        false,
    );
    assert_eq!(each.remaining(), 4);

    let mut seen = Vec::new();
    while let Some((job, outcome)) = each.next().await {
        match outcome {
            Ok(response) => assert_eq!(response.url(), format!("http://x/job/{}", job.id)),
            Err(e) => {
                assert_eq!(job.id, 2);
                assert_eq!(e.status(), Some(410));
            }
        }
        seen.push(job.id);
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_min_interval_spaces_dispatches() {
    let transport = ScriptedTransport::default();
    let limits = ThresholdLimits {
        max_in_flight: 4,
        min_interval: Duration::from_millis(100),
        rate: None,
    };
    let engine = create_test_engine(&transport, limits);

    let start = tokio::time::Instant::now();
    let results: Vec<_> = engine.swarm(urls("m", 4), false).collect().await;

    assert_eq!(results.len(), 4);
    assert!(start.elapsed() >= Duration::from_millis(300));
}
