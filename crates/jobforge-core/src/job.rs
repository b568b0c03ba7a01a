//! Job types and definitions

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job lifecycle state
///
/// Discriminants are stable and storage adapters persist them numerically.
/// `Failed` is reserved for forward compatibility: adapters accept it, but
/// the engine never settles a job there (the retry path goes back to
/// `Scheduled` and exhaustion goes to `Abandoned`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created but not yet submitted for execution
    Created = 0,

    /// Eligible for dispatch once `scheduled_at` has passed
    Scheduled = 1,

    /// A worker is executing the job
    Processing = 2,

    /// Finished successfully (terminal)
    Succeeded = 3,

    /// Reserved; not produced by the engine
    Failed = 4,

    /// Cancelled before dispatch (terminal)
    Cancelled = 5,

    /// Retries exhausted or failure declared non-retryable (terminal)
    Abandoned = 6,

    /// Waiting for a parent job to succeed
    AwaitingContinuation = 7,

    /// Waiting for every sibling in a batch to reach a terminal state
    AwaitingBatch = 8,
}

impl Default for JobState {
    fn default() -> Self {
        JobState::Created
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Created => write!(f, "created"),
            JobState::Scheduled => write!(f, "scheduled"),
            JobState::Processing => write!(f, "processing"),
            JobState::Succeeded => write!(f, "succeeded"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
            JobState::Abandoned => write!(f, "abandoned"),
            JobState::AwaitingContinuation => write!(f, "awaiting_continuation"),
            JobState::AwaitingBatch => write!(f, "awaiting_batch"),
        }
    }
}

impl JobState {
    /// Check if the state is terminal (the processor will not move it again)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Cancelled | JobState::Abandoned
        )
    }

    /// Check if the state is a waiting state (parent or batch gated)
    pub fn is_awaiting(&self) -> bool {
        matches!(
            self,
            JobState::AwaitingContinuation | JobState::AwaitingBatch
        )
    }

    /// Numeric discriminant for storage adapters
    pub fn as_i16(&self) -> i16 {
        *self as i16
    }

    /// Convert from a stored discriminant
    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(JobState::Created),
            1 => Some(JobState::Scheduled),
            2 => Some(JobState::Processing),
            3 => Some(JobState::Succeeded),
            4 => Some(JobState::Failed),
            5 => Some(JobState::Cancelled),
            6 => Some(JobState::Abandoned),
            7 => Some(JobState::AwaitingContinuation),
            8 => Some(JobState::AwaitingBatch),
            _ => None,
        }
    }
}

/// A unit of deferred work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID, immutable after creation
    pub id: String,

    /// Routing key resolved by the handler registry
    pub type_name: String,

    /// Opaque serialized payload
    pub arguments: Option<String>,

    /// Current lifecycle state
    pub state: JobState,

    /// Creation timestamp, immutable
    pub created_at: DateTime<Utc>,

    /// Earliest instant at which the job is eligible for dispatch
    pub scheduled_at: Option<DateTime<Utc>>,

    /// Set when a worker begins processing
    pub executed_at: Option<DateTime<Utc>>,

    /// Failed attempts so far
    pub retry_count: u32,

    /// Retry budget
    pub max_retry_count: u32,

    /// Last failure reason
    pub error_message: Option<String>,

    /// Opaque serialized result of a successful run
    pub result: Option<String>,

    /// Batch membership
    pub batch_id: Option<String>,

    /// Parent job for continuations
    pub parent_job_id: Option<String>,
}

impl Job {
    /// Create a new job in the `Created` state
    pub fn new(
        id: impl Into<String>,
        type_name: impl Into<String>,
        arguments: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            arguments,
            state: JobState::Created,
            created_at: Utc::now(),
            scheduled_at: None,
            executed_at: None,
            retry_count: 0,
            max_retry_count: 0,
            error_message: None,
            result: None,
            batch_id: None,
            parent_job_id: None,
        }
    }

    /// Set the retry budget
    pub fn with_max_retry_count(mut self, max_retry_count: u32) -> Self {
        self.max_retry_count = max_retry_count;
        self
    }

    /// Schedule for execution at the given instant
    pub fn scheduled(mut self, at: DateTime<Utc>) -> Self {
        self.state = JobState::Scheduled;
        self.scheduled_at = Some(at);
        self
    }

    /// Gate on a parent job; eligible only once the parent succeeds
    pub fn awaiting_continuation(mut self, parent_job_id: impl Into<String>) -> Self {
        self.state = JobState::AwaitingContinuation;
        self.parent_job_id = Some(parent_job_id.into());
        self.scheduled_at = None;
        self
    }

    /// Gate on a batch; eligible only once every sibling is terminal
    pub fn awaiting_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.state = JobState::AwaitingBatch;
        self.batch_id = Some(batch_id.into());
        self.scheduled_at = None;
        self
    }

    /// Tag with a batch id without changing state
    pub fn in_batch(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = Some(batch_id.into());
        self
    }

    /// Check whether the job is due for dispatch
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Scheduled
            && self.scheduled_at.map(|at| at <= now).unwrap_or(false)
    }

    /// Check if the job has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Mark as picked up by a worker
    pub fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.state = JobState::Processing;
        self.executed_at = Some(now);
    }

    /// Mark as finished successfully, clearing any earlier failure reason
    pub fn mark_succeeded(&mut self, result: Option<String>) {
        self.state = JobState::Succeeded;
        self.result = result;
        self.error_message = None;
    }

    /// Put back on the schedule (used for retries and gate releases)
    pub fn mark_scheduled(&mut self, at: DateTime<Utc>) {
        self.state = JobState::Scheduled;
        self.scheduled_at = Some(at);
    }

    /// Mark as permanently failed
    pub fn mark_abandoned(&mut self) {
        self.state = JobState::Abandoned;
    }

    /// Mark as cancelled before dispatch
    pub fn mark_cancelled(&mut self) {
        self.state = JobState::Cancelled;
    }
}

/// A cron schedule plus a job template
///
/// `id` is the idempotency key: registering again under the same id replaces
/// the schedule and template in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringJob {
    /// Caller-chosen identifier, primary key
    pub id: String,

    /// Five-field cron expression
    pub cron_expression: String,

    /// Routing key for materialized jobs
    pub job_type_name: String,

    /// Opaque serialized payload for materialized jobs
    pub job_arguments: Option<String>,

    /// Retry budget for materialized jobs
    pub max_retry_count: u32,

    /// Next computed fire time
    pub next_execution: Option<DateTime<Utc>>,

    /// Last time the recurring loop materialized an instance
    pub last_execution: Option<DateTime<Utc>>,

    /// Disabled definitions are kept but never materialize
    pub is_enabled: bool,

    /// Registration timestamp
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_terminality() {
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(JobState::Abandoned.is_terminal());
        assert!(!JobState::Scheduled.is_terminal());
        assert!(!JobState::Processing.is_terminal());
        assert!(!JobState::Failed.is_terminal());
    }

    #[test]
    fn test_state_discriminant_round_trip() {
        for value in 0..=8 {
            let state = JobState::from_i16(value).unwrap();
            assert_eq!(state.as_i16(), value);
        }
        assert!(JobState::from_i16(9).is_none());
        assert!(JobState::from_i16(-1).is_none());
        assert_eq!(JobState::Failed.as_i16(), 4);
        assert_eq!(JobState::AwaitingBatch.as_i16(), 8);
    }

    #[test]
    fn test_job_creation() {
        let job = Job::new("j-1", "send_email", Some("{}".to_string()));
        assert_eq!(job.state, JobState::Created);
        assert_eq!(job.retry_count, 0);
        assert!(job.scheduled_at.is_none());
        assert!(job.batch_id.is_none());
    }

    #[test]
    fn test_job_builders() {
        let now = Utc::now();
        let job = Job::new("j-1", "send_email", None)
            .with_max_retry_count(5)
            .scheduled(now);
        assert_eq!(job.state, JobState::Scheduled);
        assert_eq!(job.max_retry_count, 5);
        assert_eq!(job.scheduled_at, Some(now));

        let child = Job::new("j-2", "send_email", None).awaiting_continuation("j-1");
        assert_eq!(child.state, JobState::AwaitingContinuation);
        assert_eq!(child.parent_job_id.as_deref(), Some("j-1"));
        assert!(child.scheduled_at.is_none());

        let waiter = Job::new("j-3", "summarize", None).awaiting_batch("b-1");
        assert_eq!(waiter.state, JobState::AwaitingBatch);
        assert_eq!(waiter.batch_id.as_deref(), Some("b-1"));
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let due = Job::new("j-1", "t", None).scheduled(now - chrono::Duration::seconds(1));
        let future = Job::new("j-2", "t", None).scheduled(now + chrono::Duration::hours(1));
        let waiting = Job::new("j-3", "t", None).awaiting_continuation("j-1");

        assert!(due.is_due(now));
        assert!(!future.is_due(now));
        assert!(!waiting.is_due(now));
    }

    #[test]
    fn test_lifecycle_marks() {
        let now = Utc::now();
        let mut job = Job::new("j-1", "t", None).scheduled(now);

        job.mark_processing(now);
        assert_eq!(job.state, JobState::Processing);
        assert_eq!(job.executed_at, Some(now));

        job.mark_succeeded(Some("\"ok\"".to_string()));
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.result.as_deref(), Some("\"ok\""));
        assert!(job.is_terminal());
    }

    #[test]
    fn test_retry_and_abandon_marks() {
        let now = Utc::now();
        let mut job = Job::new("j-1", "t", None).scheduled(now);
        job.mark_processing(now);

        let retry_at = now + chrono::Duration::seconds(30);
        job.mark_scheduled(retry_at);
        assert_eq!(job.state, JobState::Scheduled);
        assert_eq!(job.scheduled_at, Some(retry_at));

        job.mark_processing(now);
        job.mark_abandoned();
        assert!(job.is_terminal());
    }
}
