//! Global admission control
//!
//! This module handles:
//! - Capping the number of requests in flight via a semaphore
//! - Spacing consecutive admissions by a minimum interval
//! - Capping admissions per time window with a `governor` token bucket
//!
//! Every admission is an RAII [`Admission`]; dropping it (or calling
//! [`Admission::release`]) frees the slot, so each admit has exactly one
//! release on every exit path.

use crate::ConfigError;
use governor::{
    clock::Clock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorRateLimiter,
};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Rate cap: at most `max` admissions in a burst, refilled at `max` per `window`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    /// Maximum admissions per window
    pub max: u32,
    /// Length of the window
    pub window: Duration,
}

/// Parameters of a [`ThresholdController`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdLimits {
    /// Maximum number of admitted, unreleased requests
    pub max_in_flight: usize,
    /// Minimum spacing between two admissions
    pub min_interval: Duration,
    /// Optional cap per rolling window
    pub rate: Option<RateWindow>,
}

impl ThresholdLimits {
    /// Few connections, a full second apart: minimise load on fragile hosts
    pub fn small_server() -> Self {
        Self {
            max_in_flight: 2,
            min_interval: Duration::from_secs(1),
            rate: None,
        }
    }

    /// Many connections, tightly spaced: maximise throughput on big hosts
    pub fn big_server() -> Self {
        Self {
            max_in_flight: 32,
            min_interval: Duration::from_millis(10),
            rate: None,
        }
    }

    /// Strict per-second cap matching a typical published API quota
    pub fn api() -> Self {
        Self {
            max_in_flight: 8,
            min_interval: Duration::ZERO,
            rate: Some(RateWindow {
                max: 10,
                window: Duration::from_secs(1),
            }),
        }
    }

    /// No spacing and no rate cap, only a concurrency limit
    pub fn unpaced(max_in_flight: usize) -> Self {
        Self {
            max_in_flight,
            min_interval: Duration::ZERO,
            rate: None,
        }
    }

    /// Looks up a preset by its configuration name
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name {
            "small-server" => Ok(Self::small_server()),
            "big-server" => Ok(Self::big_server()),
            "api" => Ok(Self::api()),
            other => Err(ConfigError::UnknownPreset {
                kind: "threshold",
                name: other.to_string(),
            }),
        }
    }
}

impl Default for ThresholdLimits {
    fn default() -> Self {
        Self {
            max_in_flight: 2,
            min_interval: Duration::from_millis(150),
            rate: None,
        }
    }
}

/// Reads the Tokio clock, so paused test time drives the rate cap too
#[derive(Debug, Clone, Copy, Default)]
struct TokioClock;

impl Clock for TokioClock {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        Instant::now().into_std()
    }
}

/// Token bucket behind a [`RateWindow`]
struct RateGate {
    limiter: GovernorRateLimiter<NotKeyed, InMemoryState, TokioClock, NoOpMiddleware<std::time::Instant>>,
}

impl RateGate {
    fn new(rate: RateWindow) -> Self {
        let max = NonZeroU32::new(rate.max).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(rate.window / max.get())
            .unwrap_or_else(|| Quota::per_second(max))
            .allow_burst(max);
        Self {
            limiter: GovernorRateLimiter::direct_with_clock(quota, TokioClock),
        }
    }

    /// Takes one cell, or returns how long until one is available
    fn try_take(&self) -> Option<Duration> {
        match self.limiter.check() {
            Ok(_) => None,
            Err(not_until) => Some(not_until.wait_time_from(TokioClock.now())),
        }
    }
}

impl fmt::Debug for RateGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateGate").finish_non_exhaustive()
    }
}

/// Result of [`ThresholdController::claim`]
#[derive(Debug)]
pub(crate) enum Claim<T> {
    /// A slot was reserved for the claimed work
    Admitted(Admission, T),
    /// Admission was granted but there was nothing to claim
    Idle,
    Closed,
}

/// Enforces global concurrency and rate limits across all workers
#[derive(Debug)]
pub struct ThresholdController {
    limits: ThresholdLimits,
    slots: Arc<Semaphore>,
    last_admission: Mutex<Option<Instant>>,
    rate: Option<RateGate>,
    in_flight: Arc<AtomicUsize>,
}

/// One reserved slot; released when dropped
#[derive(Debug)]
pub struct Admission {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Admission {
    /// Frees the slot
    pub fn release(self) {}
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ThresholdController {
    /// Creates a controller
    ///
    /// A `max_in_flight` of zero is treated as one.
    pub fn new(limits: ThresholdLimits) -> Self {
        let slots = Arc::new(Semaphore::new(limits.max_in_flight.max(1)));
        let rate = limits.rate.map(RateGate::new);
        Self {
            limits,
            slots,
            last_admission: Mutex::new(None),
            rate,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Waits for a free slot and pacing capacity, then reserves the slot
    ///
    /// Returns `None` once the controller is closed.
    pub async fn admit(&self) -> Option<Admission> {
        match self.claim(|| Some(())).await {
            Claim::Admitted(admission, ()) => Some(admission),
            Claim::Idle | Claim::Closed => None,
        }
    }

    /// Like [`admit`](Self::admit), but picks the work only once admitted
    ///
    /// `take` runs after every wait is over and while the pacing lock is
    /// still held, so whatever it returns is dispatched at the admitted
    /// instant. The spacing clock only advances when `take` returns work;
    /// the rate cell of an idle claim is spent regardless.
    pub(crate) async fn claim<T>(&self, take: impl FnOnce() -> Option<T>) -> Claim<T> {
        let Ok(permit) = Arc::clone(&self.slots).acquire_owned().await else {
            return Claim::Closed;
        };

        let mut last = self.last_admission.lock().await;
        loop {
            if let Some(previous) = *last {
                let ready = previous + self.limits.min_interval;
                if ready > Instant::now() {
                    tracing::trace!("Spacing admission until {:?}", ready);
                    tokio::time::sleep_until(ready).await;
                }
            }
            match self.rate.as_ref().and_then(RateGate::try_take) {
                None => break,
                Some(wait) => {
                    tracing::trace!("Rate cap reached; waiting {:?}", wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }

        if self.slots.is_closed() {
            return Claim::Closed;
        }
        let Some(item) = take() else {
            return Claim::Idle;
        };
        *last = Some(Instant::now());

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Claim::Admitted(
            Admission {
                _permit: permit,
                in_flight: Arc::clone(&self.in_flight),
            },
            item,
        )
    }

    /// Stops admitting; pending and future `admit` calls return `None`
    pub fn close(&self) {
        self.slots.close();
    }

    /// Number of admitted, unreleased requests
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn limits(&self) -> &ThresholdLimits {
        &self.limits
    }
}
