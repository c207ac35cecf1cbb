//! Turns configuration tables into engine parameters

use crate::config::types::{BackoffKind, Config, RetryConfig, ThresholdConfig};
use crate::engine::{RateWindow, ThresholdLimits};
use crate::retry::{Backoff, Classifier, RetryStrategy};
use crate::{ConfigError, ConfigResult};
use std::time::Duration;

const DEFAULT_RATE_WINDOW_MS: u64 = 1000;
const DEFAULT_MAX_DELAY_MS: u64 = 60_000;
const DEFAULT_CUSTOM_RETRIES: u32 = 2;

impl Config {
    /// Resolves the threshold preset and its overrides
    pub fn threshold_limits(&self) -> ConfigResult<ThresholdLimits> {
        resolve_threshold(&self.threshold)
    }

    /// Resolves the retry preset, or builds the custom strategy
    pub fn retry_strategy(&self) -> ConfigResult<RetryStrategy> {
        resolve_retry(&self.retry)
    }

    /// Explicit worker count, if one was configured
    pub fn worker_count(&self) -> Option<usize> {
        self.engine.workers
    }

    /// Default per-request timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        match self.engine.timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

fn resolve_threshold(config: &ThresholdConfig) -> ConfigResult<ThresholdLimits> {
    let mut limits = match &config.preset {
        Some(name) => ThresholdLimits::from_name(name)?,
        None => ThresholdLimits::default(),
    };

    if let Some(max_in_flight) = config.max_in_flight {
        limits.max_in_flight = max_in_flight;
    }
    if let Some(ms) = config.min_interval_ms {
        limits.min_interval = Duration::from_millis(ms);
    }

    let window = config.rate_window_ms.map(Duration::from_millis);
    limits.rate = match (config.rate_limit, limits.rate) {
        (Some(max), base) => Some(RateWindow {
            max,
            window: window
                .or(base.map(|rate| rate.window))
                .unwrap_or(Duration::from_millis(DEFAULT_RATE_WINDOW_MS)),
        }),
        (None, Some(base)) => Some(RateWindow {
            max: base.max,
            window: window.unwrap_or(base.window),
        }),
        (None, None) => None,
    };

    Ok(limits)
}

fn resolve_retry(config: &RetryConfig) -> ConfigResult<RetryStrategy> {
    if config.preset != "custom" {
        return RetryStrategy::from_name(&config.preset);
    }

    let base = config.base_delay_ms.map(Duration::from_millis).ok_or_else(|| {
        ConfigError::Validation("custom retry policy requires base-delay-ms".to_string())
    })?;
    let max = Duration::from_millis(config.max_delay_ms.unwrap_or(DEFAULT_MAX_DELAY_MS));

    let backoff = match config.backoff.unwrap_or(BackoffKind::Constant) {
        BackoffKind::Constant => Backoff::Constant(base),
        BackoffKind::Linear => Backoff::Linear { step: base, max },
        BackoffKind::Exponential => Backoff::Exponential {
            base,
            max,
            jitter: config.jitter.unwrap_or(0.0),
        },
    };

    let defaults = Classifier::http_only();
    let classifier = Classifier {
        statuses: config.retry_statuses.clone().unwrap_or(defaults.statuses),
        server_errors: config.retry_server_errors.unwrap_or(defaults.server_errors),
        timeouts: config.retry_timeouts.unwrap_or(defaults.timeouts),
        network: config.retry_connect.unwrap_or(defaults.network),
    };

    Ok(RetryStrategy {
        max_retries: config.max_retries.unwrap_or(DEFAULT_CUSTOM_RETRIES),
        backoff,
        classifier,
    })
}
