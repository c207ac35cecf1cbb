//! Configuration module for Swarm-Requests
//!
//! This module handles loading, parsing, validating and resolving TOML
//! configuration files into engine parameters.
//!
//! # Example
//!
//! ```no_run
//! use swarm_requests::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("swarm.toml")).unwrap();
//! println!("Retry preset: {}", config.retry.preset);
//! ```

mod parser;
mod resolve;
mod types;
mod validation;

// Re-export types
pub use types::{
    BackoffKind, Config, EngineConfig, RetryConfig, ThresholdConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
