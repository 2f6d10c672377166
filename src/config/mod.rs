//! Configuration management for powercycle
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::coordinator::CoordinatorConfig;

/// Default cloud API endpoint
pub const DEFAULT_API_URL: &str = "https://api.gridscale.io";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Lifecycle coordinator configuration
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Cloud API configuration
    #[serde(default)]
    pub backend: BackendConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Cloud API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// API endpoint URL
    pub api_url: String,

    /// Account user id
    pub user_id: String,

    /// API token
    pub api_token: String,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// Interval between power-state polls in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: String::from(DEFAULT_API_URL),
            user_id: String::new(),
            api_token: String::new(),
            request_timeout_secs: 60,
            poll_interval_ms: 500,
        }
    }
}

impl BackendConfig {
    /// Check that credentials are present
    pub fn has_credentials(&self) -> bool {
        !self.user_id.is_empty() && !self.api_token.is_empty()
    }

    /// Per-request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Power-state poll interval as Duration
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let shutdown_timeout_secs = std::env::var("POWERCYCLE_SHUTDOWN_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.coordinator.shutdown_timeout_secs);

        let api_url =
            std::env::var("POWERCYCLE_API_URL").unwrap_or_else(|_| String::from(DEFAULT_API_URL));

        let user_id = std::env::var("POWERCYCLE_USER_ID").unwrap_or_default();
        let api_token = std::env::var("POWERCYCLE_API_TOKEN").unwrap_or_default();

        let request_timeout_secs = std::env::var("POWERCYCLE_REQUEST_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.backend.request_timeout_secs);

        let poll_interval_ms = std::env::var("POWERCYCLE_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.backend.poll_interval_ms);

        let log_level =
            std::env::var("POWERCYCLE_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));

        let log_format =
            std::env::var("POWERCYCLE_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            coordinator: CoordinatorConfig {
                shutdown_timeout_secs,
            },
            backend: BackendConfig {
                api_url,
                user_id,
                api_token,
                request_timeout_secs,
                poll_interval_ms,
            },
            logging: LoggingConfig {
                level: log_level,
                format: log_format,
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.coordinator.validate()?;

        if self.backend.api_url.is_empty() {
            anyhow::bail!("api_url must not be empty");
        }

        if self.backend.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than 0");
        }

        if self.backend.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than 0");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("log format must be 'text' or 'json'");
        }

        Ok(())
    }
}
