//! Configuration parsing and management.
//!
//! The daemon reads a TOML file with three sections. Every field has a
//! default, so an empty file (or no file) is a valid configuration.
//!
//! ```toml
//! [store]
//! path = "/var/lib/modelver/store.db"
//!
//! [controller]
//! workers = 4
//! poll_interval_ms = 200
//! resync_interval_secs = 300
//! backoff_base_ms = 5
//! backoff_max_ms = 60000
//! change_retention = 10000
//!
//! [metrics]
//! enabled = true
//! host = "127.0.0.1"
//! port = 9464
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level modelver configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelverConfig {
    /// Object store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Dispatcher settings.
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl ModelverConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Checks cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.controller;
        if c.workers == 0 {
            return Err(ConfigError::Validation(
                "controller.workers must be at least 1".to_string(),
            ));
        }
        if c.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(ConfigError::Validation(format!(
                "controller.poll_interval_ms must be at least {MIN_POLL_INTERVAL_MS}, got {}",
                c.poll_interval_ms
            )));
        }
        if c.backoff_base_ms == 0 || c.backoff_base_ms > c.backoff_max_ms {
            return Err(ConfigError::Validation(format!(
                "controller.backoff_base_ms ({}) must be non-zero and not exceed backoff_max_ms ({})",
                c.backoff_base_ms, c.backoff_max_ms
            )));
        }
        if c.change_batch_size == 0 {
            return Err(ConfigError::Validation(
                "controller.change_batch_size must be at least 1".to_string(),
            ));
        }
        if self.store.path.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "store.path must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lower bound on the store polling interval.
pub const MIN_POLL_INTERVAL_MS: u64 = 10;

/// Object store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the `SQLite` database file.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    // ${XDG_DATA_HOME}/modelver/store.db, falling back to /var/lib.
    std::env::var("XDG_DATA_HOME").map_or_else(
        |_| PathBuf::from("/var/lib/modelver/store.db"),
        |data_dir| PathBuf::from(data_dir).join("modelver").join("store.db"),
    )
}

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Worker tasks per resource kind.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How often the store tailer polls for new changes.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Full re-list period; 0 disables periodic resync.
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,

    /// First retry delay after a handler error.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Retry delay cap.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Maximum changes read per poll.
    #[serde(default = "default_change_batch_size")]
    pub change_batch_size: usize,

    /// Change log entries kept behind the tailer cursor; 0 disables
    /// compaction.
    #[serde(default = "default_change_retention")]
    pub change_retention: u64,
}

impl ControllerConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Resync interval, `None` when disabled.
    #[must_use]
    pub const fn resync_interval(&self) -> Option<Duration> {
        if self.resync_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.resync_interval_secs))
        }
    }

    /// Base retry delay as a [`Duration`].
    #[must_use]
    pub const fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    /// Retry delay cap as a [`Duration`].
    #[must_use]
    pub const fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            resync_interval_secs: default_resync_interval_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            change_batch_size: default_change_batch_size(),
            change_retention: default_change_retention(),
        }
    }
}

const fn default_workers() -> usize {
    4
}

const fn default_poll_interval_ms() -> u64 {
    200
}

const fn default_resync_interval_secs() -> u64 {
    300
}

const fn default_backoff_base_ms() -> u64 {
    5
}

const fn default_backoff_max_ms() -> u64 {
    60_000
}

const fn default_change_batch_size() -> usize {
    256
}

const fn default_change_retention() -> u64 {
    10_000
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Serve `/metrics` over HTTP.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Listen address.
    #[serde(default = "default_metrics_host")]
    pub host: String,

    /// Listen port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            host: default_metrics_host(),
            port: default_metrics_port(),
        }
    }
}

const fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_metrics_port() -> u16 {
    9464
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
