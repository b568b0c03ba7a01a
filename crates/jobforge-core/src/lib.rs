//! Durable background job processing engine
//!
//! This crate provides:
//! - Async job submission (fire-and-forget, delayed, at-instant)
//! - Retry with per-failure delays and a bounded budget
//! - Continuations that fire after a parent job succeeds
//! - Batches with a completion-gated continuation
//! - Cron-scheduled recurring jobs
//! - A pluggable storage contract with an in-memory reference backend
//!
//! ## Architecture
//!
//! `JobClient` writes job rows through the `JobStorage` contract.
//! `JobProcessor` runs two timer loops: the scheduled-jobs loop hands due
//! jobs to a bounded worker pool, and the recurring-jobs loop materializes
//! instances of cron templates. Workers look up handlers by job type in the
//! `HandlerRegistry`, invoke them, and write outcomes (and any continuation
//! or batch cascades) back through storage.

mod batch;
pub mod client;
pub mod config;
pub mod cron;
pub mod error;
pub mod handler;
pub mod job;
pub mod processor;
pub mod storage;

// Re-export commonly used types
pub use client::JobClient;
pub use config::ProcessorConfig;
pub use cron::CronSchedule;
pub use error::{Error, Result};
pub use handler::{ExecutionResult, HandlerRegistry, JobHandler};
pub use job::{Job, JobState, RecurringJob};
pub use processor::{JobProcessor, StatsSnapshot};
pub use storage::{InMemoryStorage, JobStorage};

/// Current version of jobforge
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
    }
}
