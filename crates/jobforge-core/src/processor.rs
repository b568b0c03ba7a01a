//! Background job processor
//!
//! The processor owns two periodic loops and a bounded worker pool. The
//! scheduled-jobs loop fetches due jobs and hands them to workers; the
//! recurring-jobs loop materializes instances of cron-scheduled templates.
//! Workers drive each job from `Scheduled` through `Processing` to a
//! terminal state, cascading to continuations and batch members on the way.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::FutureExt;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::batch;
use crate::config::ProcessorConfig;
use crate::cron::CronSchedule;
use crate::error::Result;
use crate::handler::{ExecutionResult, HandlerRegistry};
use crate::job::{Job, JobState, RecurringJob};
use crate::storage::JobStorage;

/// Counters tracked across the processor's lifetime
#[derive(Debug, Default)]
pub struct ProcessorStats {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
}

impl ProcessorStats {
    fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the processor counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Jobs handed to a worker
    pub dispatched: u64,

    /// Jobs that finished successfully
    pub succeeded: u64,

    /// Failed attempts, including ones that were retried
    pub failed: u64,

    /// Jobs that exhausted their retry budget or failed non-retryably
    pub abandoned: u64,
}

/// The background engine driving jobs to completion
///
/// A processor is started once and stopped once; after `stop()` it cannot be
/// restarted. Construct a fresh one to resume processing.
pub struct JobProcessor {
    storage: Arc<dyn JobStorage>,
    registry: Arc<HandlerRegistry>,
    config: ProcessorConfig,
    semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
    running: AtomicBool,
    loops: Mutex<Vec<JoinHandle<()>>>,
    stats: ProcessorStats,
}

impl JobProcessor {
    /// Create a processor over a storage backend and a handler registry
    pub fn new(
        storage: Arc<dyn JobStorage>,
        registry: HandlerRegistry,
        config: ProcessorConfig,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        Self {
            storage,
            registry: Arc::new(registry),
            config,
            semaphore,
            shutdown: CancellationToken::new(),
            running: AtomicBool::new(false),
            loops: Mutex::new(Vec::new()),
            stats: ProcessorStats::default(),
        }
    }

    /// The active configuration
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Lifetime counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Check whether the loops are running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.shutdown.is_cancelled()
    }

    /// Start the two periodic loops
    ///
    /// Idempotent: calling `start` on a running processor is a no-op. Returns
    /// as soon as the loops are spawned.
    pub async fn start(self: Arc<Self>) {
        if self.shutdown.is_cancelled() {
            warn!("processor has been stopped and cannot be restarted");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("processor already running");
            return;
        }

        info!(
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            polling_interval_ms = self.config.polling_interval_ms,
            recurring_polling_interval_ms = self.config.recurring_polling_interval_ms,
            handlers = self.registry.len(),
            "job processor starting"
        );

        let scheduled = Arc::clone(&self);
        let recurring = Arc::clone(&self);
        let mut loops = self.loops.lock().await;
        loops.push(tokio::spawn(async move {
            scheduled.run_scheduled_loop().await;
        }));
        loops.push(tokio::spawn(async move {
            recurring.run_recurring_loop().await;
        }));
    }

    /// Stop both loops and wait for in-flight workers
    ///
    /// New dispatches cease immediately and every handler's cancellation
    /// token fires. Workers already executing are awaited up to
    /// `shutdown_timeout`, after which this returns regardless.
    pub async fn stop(&self) {
        info!("job processor stopping");
        self.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = self.loops.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        // Permits only return when workers finish, so acquiring the full
        // capacity doubles as the in-flight wait.
        let capacity = u32::try_from(self.config.max_concurrent_jobs).unwrap_or(u32::MAX);
        let drained = tokio::time::timeout(
            self.config.shutdown_timeout(),
            self.semaphore.acquire_many(capacity),
        )
        .await;
        match drained {
            Ok(Ok(_permits)) => info!("job processor stopped, all workers drained"),
            Ok(Err(_)) => {}
            Err(_) => warn!(
                timeout_ms = self.config.shutdown_timeout_ms,
                "shutdown timeout elapsed with workers still running"
            ),
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// Scheduled-jobs loop: fetch due jobs and dispatch them to workers
    async fn run_scheduled_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.polling_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("scheduled-jobs loop running");

        'ticks: loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let jobs = match self.storage.get_scheduled_jobs(self.config.batch_size).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    error!(error = %e, "failed to fetch scheduled jobs");
                    continue;
                }
            };
            if jobs.is_empty() {
                continue;
            }
            debug!(count = jobs.len(), "fetched scheduled jobs");

            for job in jobs {
                if !job.is_due(Utc::now()) {
                    continue;
                }

                // Blocks when the pool is saturated; leftovers are picked up
                // by subsequent ticks.
                let permit = tokio::select! {
                    _ = self.shutdown.cancelled() => break 'ticks,
                    permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break 'ticks,
                    },
                };

                let worker = Arc::clone(&self);
                tokio::spawn(async move {
                    worker.execute_job(job.id).await;
                    drop(permit);
                });
            }
        }

        info!("scheduled-jobs loop stopped");
    }

    /// Execute one job inside a worker
    async fn execute_job(&self, job_id: String) {
        // The scheduled window is read-committed; the row may have moved on
        // since the fetch, so drop anything no longer Scheduled.
        let mut job = match self.storage.get_job(&job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "failed to load job");
                return;
            }
        };
        if job.state != JobState::Scheduled {
            debug!(job_id = %job.id, state = %job.state, "job no longer scheduled, dropping");
            return;
        }

        job.mark_processing(Utc::now());
        if let Err(e) = self.storage.update_job(&job).await {
            error!(job_id = %job.id, error = %e, "failed to mark job processing");
            return;
        }
        self.stats.record_dispatched();
        debug!(job_id = %job.id, job_type = %job.type_name, "executing job");

        let outcome = self.invoke_handler(&job).await;
        if outcome.succeeded {
            self.complete_job(job, outcome).await;
        } else {
            self.fail_job(job, outcome).await;
        }
    }

    /// Resolve and invoke the handler, capturing panics as failures
    async fn invoke_handler(&self, job: &Job) -> ExecutionResult {
        let Some(handler) = self.registry.get(&job.type_name) else {
            return ExecutionResult::failure_no_retry(format!(
                "no handler registered for job type '{}'",
                job.type_name
            ));
        };

        let token = self.shutdown.child_token();
        let invocation = handler.handle(job.arguments.as_deref(), token);
        match AssertUnwindSafe(invocation).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => ExecutionResult::from_panic(panic),
        }
    }

    /// Success path: record the result, then cascade
    async fn complete_job(&self, mut job: Job, outcome: ExecutionResult) {
        job.mark_succeeded(outcome.result);
        if let Err(e) = self.storage.update_job(&job).await {
            error!(job_id = %job.id, error = %e, "failed to record job success");
            return;
        }
        self.stats.record_succeeded();
        info!(job_id = %job.id, job_type = %job.type_name, "job succeeded");

        self.release_continuations(&job.id).await;
        if let Some(batch_id) = job.batch_id.as_deref() {
            batch::check_batch_completion(self.storage.as_ref(), batch_id).await;
        }
    }

    /// Failure path: retry while the budget and the outcome allow, abandon
    /// otherwise
    async fn fail_job(&self, mut job: Job, outcome: ExecutionResult) {
        job.retry_count += 1;
        job.error_message = outcome
            .error_message
            .clone()
            .or_else(|| Some("job failed".to_string()));
        self.stats.record_failed();

        if outcome.should_retry && job.retry_count <= job.max_retry_count {
            let delay = outcome
                .retry_delay
                .unwrap_or_else(|| self.config.default_retry_delay());
            let retry_at = Utc::now() + ChronoDuration::milliseconds(delay.as_millis() as i64);
            job.mark_scheduled(retry_at);
            warn!(
                job_id = %job.id,
                retry_count = job.retry_count,
                max_retry_count = job.max_retry_count,
                retry_at = %retry_at,
                "job failed, retry scheduled"
            );
        } else {
            job.mark_abandoned();
            self.stats.record_abandoned();
            warn!(
                job_id = %job.id,
                retry_count = job.retry_count,
                error = job.error_message.as_deref().unwrap_or_default(),
                "job abandoned"
            );
        }

        if let Err(e) = self.storage.update_job(&job).await {
            error!(job_id = %job.id, error = %e, "failed to record job failure");
            return;
        }

        // An abandoned member can be the last terminal write its batch needs
        if job.state == JobState::Abandoned {
            if let Some(batch_id) = job.batch_id.as_deref() {
                batch::check_batch_completion(self.storage.as_ref(), batch_id).await;
            }
        }
    }

    /// Schedule every continuation still waiting on the given parent
    async fn release_continuations(&self, parent_id: &str) {
        let children = match self.storage.get_continuations(parent_id).await {
            Ok(children) => children,
            Err(e) => {
                error!(parent_id, error = %e, "failed to fetch continuations");
                return;
            }
        };

        let now = Utc::now();
        for mut child in children {
            child.mark_scheduled(now);
            match self.storage.update_job(&child).await {
                Ok(()) => debug!(job_id = %child.id, parent_id, "continuation scheduled"),
                Err(e) => error!(job_id = %child.id, error = %e, "failed to schedule continuation"),
            }
        }
    }

    /// Recurring-jobs loop: materialize cron-scheduled templates
    async fn run_recurring_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.recurring_polling_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("recurring-jobs loop running");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.run_recurring_pass().await;
        }

        info!("recurring-jobs loop stopped");
    }

    /// One tick of the recurring-jobs loop
    async fn run_recurring_pass(&self) {
        let definitions = match self.storage.get_recurring_jobs().await {
            Ok(definitions) => definitions,
            Err(e) => {
                error!(error = %e, "failed to fetch recurring jobs");
                return;
            }
        };

        for definition in definitions {
            if let Err(e) = self.fire_recurring(&definition).await {
                warn!(
                    recurring_id = %definition.id,
                    error = %e,
                    "skipping recurring definition this tick"
                );
            }
        }
    }

    /// Materialize one instance of a recurring definition if it is due
    async fn fire_recurring(&self, definition: &RecurringJob) -> Result<()> {
        let schedule = CronSchedule::parse(&definition.cron_expression)?;
        let now = Utc::now();
        let Some(due_at) = next_recurrence(&schedule, definition.last_execution, now)? else {
            return Ok(());
        };

        let job = Job::new(
            Uuid::new_v4().to_string(),
            definition.job_type_name.clone(),
            definition.job_arguments.clone(),
        )
        .with_max_retry_count(definition.max_retry_count)
        .scheduled(now);
        self.storage.store_job(&job).await?;

        let mut updated = definition.clone();
        updated.last_execution = Some(now);
        updated.next_execution = schedule.next_occurrence(now).ok();
        self.storage.store_recurring_job(&updated).await?;

        info!(
            recurring_id = %definition.id,
            job_id = %job.id,
            due_at = %due_at,
            "recurring job materialized"
        );
        Ok(())
    }
}

/// Compute the fire time a definition owes, if any
///
/// Anchored at the last materialization, or one minute back for definitions
/// that have never fired. One fire per tick: missed occurrences during
/// downtime are not backfilled.
fn next_recurrence(
    schedule: &CronSchedule,
    last_execution: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    let anchor = last_execution.unwrap_or_else(|| now - ChronoDuration::minutes(1));
    let next = schedule.next_occurrence(anchor)?;
    Ok((next <= now).then_some(next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, h, mi, s).unwrap()
    }

    #[test]
    fn test_first_fire_uses_one_minute_anchor() {
        let schedule = CronSchedule::parse("* * * * *").unwrap();
        // Never fired: the minute boundary just behind now is owed
        let due = next_recurrence(&schedule, None, at(12, 0, 30)).unwrap();
        assert_eq!(due, Some(at(12, 0, 0)));
    }

    #[test]
    fn test_fires_once_per_minute_boundary() {
        let schedule = CronSchedule::parse("* * * * *").unwrap();

        // Fired at 12:00:30; nothing new is owed within the same minute
        let due = next_recurrence(&schedule, Some(at(12, 0, 30)), at(12, 0, 55)).unwrap();
        assert_eq!(due, None);

        // One minute later the 12:01 boundary has passed
        let due = next_recurrence(&schedule, Some(at(12, 0, 30)), at(12, 1, 30)).unwrap();
        assert_eq!(due, Some(at(12, 1, 0)));
    }

    #[test]
    fn test_missed_occurrences_are_not_backfilled() {
        let schedule = CronSchedule::parse("* * * * *").unwrap();
        // Down for an hour: only the single next occurrence after the anchor
        // is owed, not sixty of them
        let due = next_recurrence(&schedule, Some(at(11, 0, 0)), at(12, 0, 30)).unwrap();
        assert_eq!(due, Some(at(11, 1, 0)));
    }

    #[test]
    fn test_future_occurrence_is_not_due() {
        let schedule = CronSchedule::parse("0 18 * * *").unwrap();
        let due = next_recurrence(&schedule, None, at(12, 0, 0)).unwrap();
        assert_eq!(due, None);
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = ProcessorStats::default();
        stats.record_dispatched();
        stats.record_succeeded();
        stats.record_dispatched();
        stats.record_failed();
        stats.record_abandoned();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.dispatched, 2);
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.abandoned, 1);
    }
}
