//! In-memory storage backend
//!
//! Reference implementation of the storage contract. Used by the test suite
//! and by hosting applications that do not need durability across restarts.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::job::{Job, JobState, RecurringJob};
use crate::storage::JobStorage;

/// Storage backend holding all rows in process memory
#[derive(Default)]
pub struct InMemoryStorage {
    jobs: RwLock<HashMap<String, Job>>,
    recurring: RwLock<HashMap<String, RecurringJob>>,
}

impl InMemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of jobs in any state
    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}

#[async_trait]
impl JobStorage for InMemoryStorage {
    async fn store_job(&self, job: &Job) -> Result<String> {
        self.jobs
            .write()
            .await
            .insert(job.id.clone(), job.clone());
        Ok(job.id.clone())
    }

    async fn update_job(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(Error::not_found(&job.id)),
        }
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        self.jobs.write().await.remove(id);
        Ok(())
    }

    async fn get_scheduled_jobs(&self, batch_size: usize) -> Result<Vec<Job>> {
        let now = Utc::now();
        let jobs = self.jobs.read().await;
        let mut due: Vec<Job> = jobs
            .values()
            .filter(|job| job.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|job| job.scheduled_at);
        due.truncate(batch_size);
        Ok(due)
    }

    async fn get_jobs_by_state(&self, state: JobState, batch_size: usize) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|job| job.state == state)
            .cloned()
            .collect();
        matching.sort_by_key(|job| job.created_at);
        matching.truncate(batch_size);
        Ok(matching)
    }

    async fn get_job_count(&self, state: JobState) -> Result<u64> {
        let jobs = self.jobs.read().await;
        Ok(jobs.values().filter(|job| job.state == state).count() as u64)
    }

    async fn store_batch(&self, batch_id: &str, jobs: &[Job]) -> Result<()> {
        let mut store = self.jobs.write().await;
        for job in jobs {
            let mut job = job.clone();
            job.batch_id = Some(batch_id.to_string());
            store.insert(job.id.clone(), job);
        }
        Ok(())
    }

    async fn get_batch_jobs(&self, batch_id: &str) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|job| job.batch_id.as_deref() == Some(batch_id))
            .cloned()
            .collect())
    }

    async fn store_continuation(&self, parent_id: &str, job: &Job) -> Result<()> {
        let mut store = self.jobs.write().await;
        let mut job = job.clone();
        job.parent_job_id = Some(parent_id.to_string());
        store.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get_continuations(&self, parent_id: &str) -> Result<Vec<Job>> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|job| {
                job.parent_job_id.as_deref() == Some(parent_id)
                    && job.state == JobState::AwaitingContinuation
            })
            .cloned()
            .collect())
    }

    async fn store_recurring_job(&self, recurring: &RecurringJob) -> Result<()> {
        self.recurring
            .write()
            .await
            .insert(recurring.id.clone(), recurring.clone());
        Ok(())
    }

    async fn get_recurring_jobs(&self) -> Result<Vec<RecurringJob>> {
        let recurring = self.recurring.read().await;
        Ok(recurring
            .values()
            .filter(|definition| definition.is_enabled)
            .cloned()
            .collect())
    }

    async fn remove_recurring_job(&self, id: &str) -> Result<()> {
        self.recurring.write().await.remove(id);
        Ok(())
    }
}
