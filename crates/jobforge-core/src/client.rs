//! Job submission API
//!
//! `JobClient` is the application-facing surface: it serializes typed
//! payloads, generates ids, and writes rows through the storage contract.
//! After submission the processor owns every mutation except explicit
//! deletes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::batch;
use crate::cron::CronSchedule;
use crate::error::Result;
use crate::job::{Job, JobState, RecurringJob};
use crate::storage::JobStorage;

/// Client for submitting and managing jobs
#[derive(Clone)]
pub struct JobClient {
    storage: Arc<dyn JobStorage>,
}

impl JobClient {
    /// Create a client over a storage backend
    pub fn new(storage: Arc<dyn JobStorage>) -> Self {
        Self { storage }
    }

    /// The underlying storage handle
    pub fn storage(&self) -> &Arc<dyn JobStorage> {
        &self.storage
    }

    /// Submit a job for immediate execution
    pub async fn enqueue<T: Serialize>(
        &self,
        job_type: &str,
        args: &T,
        max_retry_count: u32,
    ) -> Result<String> {
        self.schedule_at(job_type, args, Utc::now(), max_retry_count)
            .await
    }

    /// Submit a job to run after a delay
    pub async fn schedule_in<T: Serialize>(
        &self,
        job_type: &str,
        args: &T,
        delay: std::time::Duration,
        max_retry_count: u32,
    ) -> Result<String> {
        let delay = chrono::Duration::from_std(delay)
            .map_err(|_| crate::error::Error::Other("delay out of range".to_string()))?;
        self.schedule_at(job_type, args, Utc::now() + delay, max_retry_count)
            .await
    }

    /// Submit a job to run at a specific instant
    pub async fn schedule_at<T: Serialize>(
        &self,
        job_type: &str,
        args: &T,
        at: DateTime<Utc>,
        max_retry_count: u32,
    ) -> Result<String> {
        let job = Job::new(fresh_id(), job_type, Some(serde_json::to_string(args)?))
            .with_max_retry_count(max_retry_count)
            .scheduled(at);

        let id = self.storage.store_job(&job).await?;
        debug!(job_id = %id, job_type, scheduled_at = %at, "job scheduled");
        Ok(id)
    }

    /// Submit a continuation that becomes eligible once its parent succeeds
    ///
    /// `scheduled_at` stays unset; the processor assigns it when the parent
    /// reaches `Succeeded`.
    pub async fn continue_with<T: Serialize>(
        &self,
        parent_job_id: &str,
        job_type: &str,
        args: &T,
        max_retry_count: u32,
    ) -> Result<String> {
        let job = Job::new(fresh_id(), job_type, Some(serde_json::to_string(args)?))
            .with_max_retry_count(max_retry_count)
            .awaiting_continuation(parent_job_id);

        self.storage.store_continuation(parent_job_id, &job).await?;
        debug!(job_id = %job.id, parent_job_id, job_type, "continuation stored");
        Ok(job.id)
    }

    /// Submit a batch of sibling jobs sharing one payload type
    ///
    /// Members are written `Scheduled` and run immediately; only batch
    /// continuations (see [`continue_batch_with`](Self::continue_batch_with))
    /// wait on the batch. Returns the batch id and the member job ids.
    pub async fn enqueue_batch<T: Serialize>(
        &self,
        job_type: &str,
        args_list: &[T],
        max_retry_count: u32,
    ) -> Result<(String, Vec<String>)> {
        let batch_id = fresh_id();
        let now = Utc::now();

        let mut jobs = Vec::with_capacity(args_list.len());
        for args in args_list {
            let job = Job::new(fresh_id(), job_type, Some(serde_json::to_string(args)?))
                .with_max_retry_count(max_retry_count)
                .scheduled(now)
                .in_batch(batch_id.clone());
            jobs.push(job);
        }

        let job_ids: Vec<String> = jobs.iter().map(|job| job.id.clone()).collect();
        self.storage.store_batch(&batch_id, &jobs).await?;
        debug!(batch_id = %batch_id, members = jobs.len(), job_type, "batch stored");
        Ok((batch_id, job_ids))
    }

    /// Submit a job that fires once every current member of the batch has
    /// reached a terminal state
    pub async fn continue_batch_with<T: Serialize>(
        &self,
        batch_id: &str,
        job_type: &str,
        args: &T,
        max_retry_count: u32,
    ) -> Result<String> {
        let job = Job::new(fresh_id(), job_type, Some(serde_json::to_string(args)?))
            .with_max_retry_count(max_retry_count)
            .awaiting_batch(batch_id);

        self.storage.store_job(&job).await?;
        debug!(job_id = %job.id, batch_id, job_type, "batch continuation stored");

        // The batch may already be fully terminal, in which case no further
        // member completion will ever re-check it.
        let members = self.storage.get_batch_jobs(batch_id).await?;
        let already_complete = members
            .iter()
            .filter(|member| member.state != JobState::AwaitingBatch)
            .all(Job::is_terminal);
        if already_complete {
            let mut job = job;
            job.mark_scheduled(Utc::now());
            self.storage.update_job(&job).await?;
            debug!(job_id = %job.id, batch_id, "batch already complete, continuation scheduled");
            return Ok(job.id);
        }

        Ok(job.id)
    }

    /// Register or replace a recurring job definition
    ///
    /// The cron expression is validated by parsing before anything is
    /// written. Registering again under the same id replaces the schedule
    /// and template in place.
    pub async fn add_or_update_recurring_job<T: Serialize>(
        &self,
        id: &str,
        job_type: &str,
        args: &T,
        cron_expression: &str,
        max_retry_count: u32,
    ) -> Result<()> {
        let schedule = CronSchedule::parse(cron_expression)?;
        let now = Utc::now();

        let definition = RecurringJob {
            id: id.to_string(),
            cron_expression: cron_expression.to_string(),
            job_type_name: job_type.to_string(),
            job_arguments: Some(serde_json::to_string(args)?),
            max_retry_count,
            next_execution: schedule.next_occurrence(now).ok(),
            last_execution: None,
            is_enabled: true,
            created_at: now,
        };

        self.storage.store_recurring_job(&definition).await?;
        debug!(recurring_id = %id, cron = %cron_expression, job_type, "recurring job upserted");
        Ok(())
    }

    /// Remove a recurring definition; missing ids are a no-op
    pub async fn remove_recurring_job(&self, id: &str) -> Result<()> {
        self.storage.remove_recurring_job(id).await
    }

    /// Cancel a job that has not been dispatched yet
    ///
    /// Returns `true` and writes `Cancelled` only when the stored state at
    /// call time is `Scheduled`; any other state (or a missing job) returns
    /// `false` without a write.
    pub async fn cancel_job(&self, id: &str) -> Result<bool> {
        let Some(mut job) = self.storage.get_job(id).await? else {
            return Ok(false);
        };
        if job.state != JobState::Scheduled {
            return Ok(false);
        }

        job.mark_cancelled();
        match self.storage.update_job(&job).await {
            Ok(()) => {
                debug!(job_id = %id, "job cancelled");
                // Cancellation can be the last terminal write a batch is
                // waiting on
                if let Some(batch_id) = job.batch_id.as_deref() {
                    batch::check_batch_completion(self.storage.as_ref(), batch_id).await;
                }
                Ok(true)
            }
            // The job disappeared between the read and the write
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete a job; missing ids are a no-op
    pub async fn delete_job(&self, id: &str) -> Result<()> {
        self.storage.delete_job(id).await
    }

    /// Fetch a job by id
    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        self.storage.get_job(id).await
    }

    /// Count jobs currently in the given state
    pub async fn get_job_count(&self, state: JobState) -> Result<u64> {
        self.storage.get_job_count(state).await
    }
}

/// Generate a fresh v4 UUID in string form
fn fresh_id() -> String {
    Uuid::new_v4().to_string()
}
