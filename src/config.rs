//! Data-layer configuration
//!
//! Loaded from a JSON document; every field has a default so an empty
//! object is a valid configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DataError, DataResult};

fn default_database() -> String {
    "vaultbase".to_string()
}

fn default_max_limit() -> u64 {
    1000
}

fn default_max_total_count() -> u64 {
    100_000
}

fn default_true() -> bool {
    true
}

fn default_max_execution_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_step_delay_ms() -> u64 {
    100
}

/// Retry policy for retryable storage failures.
///
/// Delay before attempt `n + 1` is `base + step * n`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            step_delay_ms: default_step_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// No waiting between attempts (tests)
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay_ms: 0,
            step_delay_ms: 0,
        }
    }

    /// Linear backoff delay after `attempt` failed attempts
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms + self.step_delay_ms * u64::from(attempt))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Configuration of one adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataConfig {
    /// Base physical database name
    #[serde(default = "default_database")]
    pub database: String,

    /// Absolute cap on list limits
    #[serde(default = "default_max_limit")]
    pub max_limit: u64,

    /// Hard ceiling for count-only operations
    #[serde(default = "default_max_total_count")]
    pub max_total_count: u64,

    /// Run full validation after create/update
    #[serde(default = "default_true")]
    pub validate_on_write: bool,

    /// Maximum time of one storage call
    #[serde(default = "default_max_execution_ms")]
    pub max_execution_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            max_limit: default_max_limit(),
            max_total_count: default_max_total_count(),
            validate_on_write: true,
            max_execution_ms: default_max_execution_ms(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl DataConfig {
    /// Parse a JSON configuration document
    pub fn from_json_str(content: &str) -> DataResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| DataError::Config(format!("Invalid configuration: {}", e)))
    }

    /// Load configuration from a file
    pub fn load(path: impl AsRef<Path>) -> DataResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| DataError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&content)
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn max_execution(&self) -> Duration {
        Duration::from_millis(self.max_execution_ms)
    }
}
