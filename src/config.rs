//! WolfPool Configuration
//!
//! This module provides configuration structures for the `wolfpool`
//! binary: which pool to track, how to reach its coordinator, and logging.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::address::PoolAddress;
use crate::cluster::PoolOptions;
use crate::endpoint::Endpoint;

/// Main WolfPool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfPoolConfig {
    /// Pool configuration
    pub pool: PoolConfig,

    /// Coordinator configuration
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pool address, `<scheme>!<bootstrap>!<path>`
    pub address: String,

    /// Size the pool from its config blob (false mirrors discovery)
    #[serde(default = "default_true")]
    pub managed: bool,

    /// Endpoints published until live data arrives (`host:port[:weight]`)
    #[serde(default)]
    pub backup: Vec<String>,

    /// How long `watch` waits for the pool to become ready
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    /// Capacity of the update queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Poll interval for the file coordinator in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Retry delay when the config source is unavailable, in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_ready_timeout_ms() -> u64 {
    30_000
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl WolfPoolConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfPoolConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        self.address()?;
        self.backup_pool()?;

        if self.pool.queue_capacity == 0 {
            return Err(crate::Error::Config("pool.queue_capacity must be positive".into()));
        }

        if self.coordinator.poll_interval_ms == 0 {
            return Err(crate::Error::Config(
                "coordinator.poll_interval_ms must be positive".into(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "compact") {
            return Err(crate::Error::Config(format!(
                "logging.format must be 'pretty' or 'compact', got '{}'",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Parsed pool address
    pub fn address(&self) -> crate::Result<PoolAddress> {
        self.pool.address.parse()
    }

    /// Parsed backup pool, `None` when not configured
    pub fn backup_pool(&self) -> crate::Result<Option<BTreeSet<Endpoint>>> {
        if self.pool.backup.is_empty() {
            return Ok(None);
        }
        let mut pool = BTreeSet::new();
        for entry in &self.pool.backup {
            pool.replace(entry.parse::<Endpoint>()?);
        }
        Ok(Some(pool))
    }

    /// Get poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.coordinator.poll_interval_ms)
    }

    /// Get ready timeout as Duration
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.pool.ready_timeout_ms)
    }

    /// Options for opening the configured pool
    pub fn pool_options(&self) -> crate::Result<PoolOptions> {
        Ok(PoolOptions {
            managed: self.pool.managed,
            backup: self.backup_pool()?,
            queue_capacity: self.pool.queue_capacity,
            retry_delay: Duration::from_millis(self.coordinator.retry_delay_ms),
        })
    }
}
