use serde::Deserialize;

/// Main configuration structure for Swarm-Requests
///
/// Every table is optional; a missing table takes its defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub engine: EngineConfig,
    pub threshold: ThresholdConfig,
    pub retry: RetryConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
}

/// Worker pool and transport defaults
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct EngineConfig {
    /// Number of workers; defaults to the threshold's max in flight
    pub workers: Option<usize>,

    /// Default per-request timeout (milliseconds); 0 disables it
    pub timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: None,
            timeout_ms: 30_000,
        }
    }
}

/// Global admission limits
///
/// Explicit keys override the chosen preset.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ThresholdConfig {
    /// "small-server", "big-server" or "api"
    pub preset: Option<String>,

    /// Maximum number of requests in flight
    pub max_in_flight: Option<usize>,

    /// Minimum spacing between two admissions (milliseconds)
    pub min_interval_ms: Option<u64>,

    /// Maximum admissions per rolling window
    pub rate_limit: Option<u32>,

    /// Length of the rolling window (milliseconds)
    pub rate_window_ms: Option<u64>,
}

/// Shape of a custom backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Constant,
    Linear,
    Exponential,
}

/// Retry policy selection
///
/// Every key but `preset` applies to `preset = "custom"` only.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct RetryConfig {
    /// "none", "strict", "big-scrape", "small-scrape", "api" or "custom"
    pub preset: String,

    pub max_retries: Option<u32>,
    pub backoff: Option<BackoffKind>,

    /// Constant delay, linear step or exponential base (milliseconds)
    pub base_delay_ms: Option<u64>,

    /// Cap for linear and exponential delays (milliseconds)
    pub max_delay_ms: Option<u64>,

    /// Random extra wait as a fraction of the delay, exponential only
    pub jitter: Option<f64>,

    /// Statuses always treated as transient
    pub retry_statuses: Option<Vec<u16>>,
    pub retry_server_errors: Option<bool>,
    pub retry_timeouts: Option<bool>,
    pub retry_connect: Option<bool>,
}

impl RetryConfig {
    /// Returns true if any custom-only key is set
    pub fn has_custom_keys(&self) -> bool {
        self.max_retries.is_some()
            || self.backoff.is_some()
            || self.base_delay_ms.is_some()
            || self.max_delay_ms.is_some()
            || self.jitter.is_some()
            || self.retry_statuses.is_some()
            || self.retry_server_errors.is_some()
            || self.retry_timeouts.is_some()
            || self.retry_connect.is_some()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            preset: "strict".to_string(),
            max_retries: None,
            backoff: None,
            base_delay_ms: None,
            max_delay_ms: None,
            jitter: None,
            retry_statuses: None,
            retry_server_errors: None,
            retry_timeouts: None,
            retry_connect: None,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct UserAgentConfig {
    /// Name of the client
    pub name: String,

    /// Version of the client
    pub version: String,

    /// URL with information about the client
    pub contact_url: Option<String>,
}

impl UserAgentConfig {
    /// Formats the `User-Agent` header value
    ///
    /// `name/version`, followed by ` (+contact-url)` when one is set.
    pub fn header_value(&self) -> String {
        match &self.contact_url {
            Some(url) => format!("{}/{} (+{})", self.name, self.version, url),
            None => format!("{}/{}", self.name, self.version),
        }
    }
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: None,
        }
    }
}
