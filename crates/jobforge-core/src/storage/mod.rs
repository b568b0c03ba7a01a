//! Storage contract for jobs and recurring definitions
//!
//! Any backend that satisfies [`JobStorage`] can host the engine. Queries are
//! best-effort read-committed: a job may still appear in a scheduled-jobs
//! window after another worker has moved it on, so the processor re-checks
//! state before executing.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::job::{Job, JobState, RecurringJob};

pub use memory::InMemoryStorage;

/// Persistence operations every backend must provide
///
/// All operations may fail with `Error::Storage` on backend I/O faults.
/// Deletes and removes are idempotent; a missing id is not an error.
#[async_trait]
pub trait JobStorage: Send + Sync {
    /// Insert a new job; the caller guarantees `id` is unique. Returns the id.
    async fn store_job(&self, job: &Job) -> Result<String>;

    /// Overwrite the mutable fields of an existing job
    ///
    /// Fails with `Error::NotFound` when no row matches the id.
    async fn update_job(&self, job: &Job) -> Result<()>;

    /// Fetch a job by id
    async fn get_job(&self, id: &str) -> Result<Option<Job>>;

    /// Delete a job; deleting a missing id is a no-op
    async fn delete_job(&self, id: &str) -> Result<()>;

    /// Up to `batch_size` jobs with `state = Scheduled` and a due
    /// `scheduled_at`, ordered by `scheduled_at` ascending
    async fn get_scheduled_jobs(&self, batch_size: usize) -> Result<Vec<Job>>;

    /// Up to `batch_size` jobs in the given state, ordered by `created_at`
    /// ascending
    async fn get_jobs_by_state(&self, state: JobState, batch_size: usize) -> Result<Vec<Job>>;

    /// Exact count of jobs currently in the given state
    async fn get_job_count(&self, state: JobState) -> Result<u64>;

    /// Bulk insert jobs that all share `batch_id`
    async fn store_batch(&self, batch_id: &str, jobs: &[Job]) -> Result<()>;

    /// All jobs with the given batch id, in any state
    async fn get_batch_jobs(&self, batch_id: &str) -> Result<Vec<Job>>;

    /// Persist a continuation gated on `parent_id`
    async fn store_continuation(&self, parent_id: &str, job: &Job) -> Result<()>;

    /// Continuations of the given parent still awaiting it
    async fn get_continuations(&self, parent_id: &str) -> Result<Vec<Job>>;

    /// Insert or replace a recurring definition keyed by its id
    async fn store_recurring_job(&self, recurring: &RecurringJob) -> Result<()>;

    /// All enabled recurring definitions
    async fn get_recurring_jobs(&self) -> Result<Vec<RecurringJob>>;

    /// Remove a recurring definition; a missing id is a no-op
    async fn remove_recurring_job(&self, id: &str) -> Result<()>;
}
