use super::{Backoff, Classifier, RetryDecision, RetryPolicy};
use crate::request::Request;
use crate::{ConfigError, Failure, FailureKind, RequestError};
use std::time::Duration;

/// Data-only retry policy: a ceiling, a delay function and a classifier
#[derive(Debug, Clone, PartialEq)]
pub struct RetryStrategy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay before each retry
    pub backoff: Backoff,
    /// Which failures are worth retrying
    pub classifier: Classifier,
}

impl RetryStrategy {
    /// Never retries; transient failures surface as exhausted immediately
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Backoff::Constant(Duration::ZERO),
            classifier: Classifier::tolerant(),
        }
    }

    /// Two retries, two seconds apart, for HTTP status failures only
    pub fn strict() -> Self {
        Self {
            max_retries: 2,
            backoff: Backoff::Constant(Duration::from_secs(2)),
            classifier: Classifier::http_only(),
        }
    }

    /// Many retries with jittered exponential backoff, for large scrapes
    /// over many lightly-trusted targets
    pub fn big_scrape() -> Self {
        Self {
            max_retries: 8,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(500),
                max: Duration::from_secs(300),
                jitter: 0.25,
            },
            classifier: Classifier::tolerant(),
        }
    }

    /// Few retries a full minute apart, for small servers that go down
    /// every now and then
    pub fn small_scrape() -> Self {
        Self {
            max_retries: 4,
            backoff: Backoff::Constant(Duration::from_secs(60)),
            classifier: Classifier::tolerant(),
        }
    }

    /// Two quick retries on throttling and gateway errors, for well-behaved
    /// rate-limited services
    pub fn api() -> Self {
        Self {
            max_retries: 2,
            backoff: Backoff::Constant(Duration::from_millis(500)),
            classifier: Classifier::narrow(),
        }
    }

    /// Looks up a preset by its configuration name
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name {
            "none" => Ok(Self::none()),
            "strict" => Ok(Self::strict()),
            "big-scrape" => Ok(Self::big_scrape()),
            "small-scrape" => Ok(Self::small_scrape()),
            "api" => Ok(Self::api()),
            other => Err(ConfigError::UnknownPreset {
                kind: "retry",
                name: other.to_string(),
            }),
        }
    }

    /// Replaces the backoff, keeping ceiling and classifier
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Replaces the retry ceiling
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::strict()
    }
}

impl RetryPolicy for RetryStrategy {
    fn decide(&self, request: &Request, failure: Failure) -> RetryDecision {
        let url = request.url().to_string();

        let attempt = request.attempt();
        if self.classifier.classify(&failure) == FailureKind::Permanent {
            return RetryDecision::Abandon(RequestError::Permanent {
                url,
                attempts: attempt + 1,
                failure,
                response: None,
            });
        }

        if attempt >= self.max_retries {
            return RetryDecision::Abandon(RequestError::PolicyExhausted {
                url,
                attempts: attempt + 1,
                last: failure,
                response: None,
            });
        }

        RetryDecision::Resubmit(self.backoff.delay(attempt))
    }
}
