//! Processor configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the job processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Worker-pool capacity
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Cadence of the scheduled-jobs loop
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,

    /// Cadence of the recurring-jobs loop
    #[serde(default = "default_recurring_polling_interval_ms")]
    pub recurring_polling_interval_ms: u64,

    /// Max jobs fetched per scheduled-jobs tick
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Retry delay applied when a handler does not specify one
    #[serde(default = "default_retry_delay_ms")]
    pub default_retry_delay_ms: u64,

    /// Max time to await in-flight workers on stop
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 10,
            polling_interval_ms: 5_000,
            recurring_polling_interval_ms: 60_000,
            batch_size: 100,
            default_retry_delay_ms: 30_000,
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl ProcessorConfig {
    /// Development configuration (small pool, fast polls)
    pub fn development() -> Self {
        Self {
            max_concurrent_jobs: 2,
            polling_interval_ms: 500,
            recurring_polling_interval_ms: 5_000,
            default_retry_delay_ms: 1_000,
            shutdown_timeout_ms: 5_000,
            ..Self::default()
        }
    }

    /// Get the scheduled-jobs loop cadence as Duration
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    /// Get the recurring-jobs loop cadence as Duration
    pub fn recurring_polling_interval(&self) -> Duration {
        Duration::from_millis(self.recurring_polling_interval_ms)
    }

    /// Get the fallback retry delay as Duration
    pub fn default_retry_delay(&self) -> Duration {
        Duration::from_millis(self.default_retry_delay_ms)
    }

    /// Get the shutdown wait bound as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

// Default value helper functions
fn default_max_concurrent_jobs() -> usize {
    10
}
fn default_polling_interval_ms() -> u64 {
    5_000
}
fn default_recurring_polling_interval_ms() -> u64 {
    60_000
}
fn default_batch_size() -> usize {
    100
}
fn default_retry_delay_ms() -> u64 {
    30_000
}
fn default_shutdown_timeout_ms() -> u64 {
    30_000
}
