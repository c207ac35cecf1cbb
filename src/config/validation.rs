use crate::config::types::{Config, EngineConfig, RetryConfig, ThresholdConfig, UserAgentConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_engine_config(&config.engine)?;
    validate_threshold_config(&config.threshold)?;
    validate_retry_config(&config.retry)?;
    validate_user_agent_config(&config.user_agent)?;

    // Preset names and custom-policy requirements are checked by resolving
    config.threshold_limits()?;
    config.retry_strategy()?;

    Ok(())
}

/// Validates engine configuration
fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.workers == Some(0) {
        return Err(ConfigError::Validation(
            "workers must be >= 1, got 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates threshold configuration
fn validate_threshold_config(config: &ThresholdConfig) -> Result<(), ConfigError> {
    if let Some(max_in_flight) = config.max_in_flight {
        if !(1..=1000).contains(&max_in_flight) {
            return Err(ConfigError::Validation(format!(
                "max-in-flight must be between 1 and 1000, got {}",
                max_in_flight
            )));
        }
    }

    if config.rate_limit == Some(0) {
        return Err(ConfigError::Validation(
            "rate-limit must be >= 1, got 0".to_string(),
        ));
    }

    if config.rate_window_ms == Some(0) {
        return Err(ConfigError::Validation(
            "rate-window-ms must be >= 1, got 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates retry configuration
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.preset != "custom" && config.has_custom_keys() {
        return Err(ConfigError::Validation(format!(
            "retry keys other than preset require preset = \"custom\", got preset = \"{}\"",
            config.preset
        )));
    }

    if let Some(max_retries) = config.max_retries {
        if max_retries > 50 {
            return Err(ConfigError::Validation(format!(
                "max-retries must be <= 50, got {}",
                max_retries
            )));
        }
    }

    if let Some(jitter) = config.jitter {
        if !(0.0..1.0).contains(&jitter) {
            return Err(ConfigError::Validation(format!(
                "jitter must be in [0, 1), got {}",
                jitter
            )));
        }
    }

    if let (Some(base), Some(max)) = (config.base_delay_ms, config.max_delay_ms) {
        if max < base {
            return Err(ConfigError::Validation(format!(
                "max-delay-ms ({}) must be >= base-delay-ms ({})",
                max, base
            )));
        }
    }

    if let Some(statuses) = &config.retry_statuses {
        if let Some(code) = statuses.iter().find(|code| !(100..600).contains(*code)) {
            return Err(ConfigError::Validation(format!(
                "retry-statuses contains invalid HTTP status {}",
                code
            )));
        }
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate name: non-empty, alphanumeric plus '-', '_' and '.'
    if config.name.is_empty() {
        return Err(ConfigError::Validation("name cannot be empty".to_string()));
    }

    if !config
        .name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(ConfigError::Validation(format!(
            "name must contain only alphanumeric characters, '-', '_' and '.', got '{}'",
            config.name
        )));
    }

    if config.version.is_empty() {
        return Err(ConfigError::Validation(
            "version cannot be empty".to_string(),
        ));
    }

    // Validate contact URL
    if let Some(contact_url) = &config.contact_url {
        Url::parse(contact_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact-url: {}", e)))?;
    }

    Ok(())
}
