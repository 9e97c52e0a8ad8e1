#![deny(unsafe_code)]

//! Configuration loading and validation for dripgate.
//!
//! Loads TOML configuration files and validates them. The [`AppConfig`] type
//! carries the parameters for the global limiter, the per-host limiter and
//! logging.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Limiter shared by every event, regardless of source.
    #[serde(default)]
    pub global: LimitConfig,

    /// Limiter applied independently to each source host.
    #[serde(default)]
    pub per_host: HostLimitConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Parameters for a single token bucket.
///
/// A `rate` of zero disables limiting entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Tokens granted every `per_secs` seconds.
    #[serde(default)]
    pub rate: u32,

    /// Length of the rate window in seconds.
    #[serde(default = "default_per_secs")]
    pub per_secs: u32,

    /// Instantaneous capacity. Values not above `rate` are ignored.
    #[serde(default)]
    pub burst: u32,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            rate: 0,
            per_secs: default_per_secs(),
            burst: 0,
        }
    }
}

/// Parameters for the per-host limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostLimitConfig {
    /// Tokens granted to each host every `per_secs` seconds (0 = unlimited).
    #[serde(default)]
    pub rate: u32,

    /// Length of the rate window in seconds.
    #[serde(default = "default_per_secs")]
    pub per_secs: u32,

    /// Instantaneous capacity per host.
    #[serde(default)]
    pub burst: u32,

    /// Maximum number of hosts tracked at once. The least recently seen
    /// host is forgotten when this is exceeded.
    #[serde(default = "default_max_hosts")]
    pub max_hosts: usize,
}

impl Default for HostLimitConfig {
    fn default() -> Self {
        Self {
            rate: 0,
            per_secs: default_per_secs(),
            burst: 0,
            max_hosts: default_max_hosts(),
        }
    }
}

fn default_per_secs() -> u32 {
    1
}

fn default_max_hosts() -> usize {
    10_000
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        debug!(path = %path.display(), bytes = content.len(), "Loaded config file");
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.global.per_secs == 0 {
            return Err(ConfigError::Validation(
                "global.per_secs must be at least 1".to_string(),
            ));
        }
        if self.per_host.per_secs == 0 {
            return Err(ConfigError::Validation(
                "per_host.per_secs must be at least 1".to_string(),
            ));
        }
        if self.per_host.max_hosts == 0 {
            return Err(ConfigError::Validation(
                "per_host.max_hosts must be at least 1".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }
}
