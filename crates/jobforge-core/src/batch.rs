//! Batch completion handling
//!
//! A batch admits its continuations once every regular member has reached a
//! terminal state. Completion is re-checked after every write that can be a
//! member's last: a worker recording success or abandonment, and a client
//! cancelling a member before dispatch.

use chrono::Utc;
use tracing::{error, info};

use crate::job::{Job, JobState};
use crate::storage::JobStorage;

/// Schedule the batch's continuations if every regular member is terminal
///
/// Storage faults are logged and leave the batch untouched; the next
/// member-terminal write retries the check.
pub(crate) async fn check_batch_completion(storage: &dyn JobStorage, batch_id: &str) {
    let jobs = match storage.get_batch_jobs(batch_id).await {
        Ok(jobs) => jobs,
        Err(e) => {
            error!(batch_id, error = %e, "failed to fetch batch jobs");
            return;
        }
    };

    let (waiting, members): (Vec<Job>, Vec<Job>) = jobs
        .into_iter()
        .partition(|job| job.state == JobState::AwaitingBatch);
    if waiting.is_empty() || !members.iter().all(Job::is_terminal) {
        return;
    }

    let now = Utc::now();
    for mut continuation in waiting {
        continuation.mark_scheduled(now);
        match storage.update_job(&continuation).await {
            Ok(()) => {
                info!(job_id = %continuation.id, batch_id, "batch complete, continuation scheduled")
            }
            Err(e) => {
                error!(job_id = %continuation.id, error = %e, "failed to schedule batch continuation")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    async fn batch_with_member_in(storage: &InMemoryStorage, state: JobState) -> String {
        let mut member = Job::new("m-1", "work", None).scheduled(Utc::now());
        member.state = state;
        storage.store_batch("b-1", &[member]).await.unwrap();

        let continuation = Job::new("c-1", "summarize", None).awaiting_batch("b-1");
        storage.store_job(&continuation).await.unwrap();
        "b-1".to_string()
    }

    #[tokio::test]
    async fn test_terminal_members_release_continuation() {
        for state in [JobState::Succeeded, JobState::Abandoned, JobState::Cancelled] {
            let storage = InMemoryStorage::new();
            let batch_id = batch_with_member_in(&storage, state).await;

            check_batch_completion(&storage, &batch_id).await;

            let continuation = storage.get_job("c-1").await.unwrap().unwrap();
            assert_eq!(continuation.state, JobState::Scheduled, "member in {}", state);
            assert!(continuation.scheduled_at.is_some());
        }
    }

    #[tokio::test]
    async fn test_outstanding_member_keeps_continuation_waiting() {
        for state in [JobState::Scheduled, JobState::Processing] {
            let storage = InMemoryStorage::new();
            let batch_id = batch_with_member_in(&storage, state).await;

            check_batch_completion(&storage, &batch_id).await;

            let continuation = storage.get_job("c-1").await.unwrap().unwrap();
            assert_eq!(
                continuation.state,
                JobState::AwaitingBatch,
                "member in {}",
                state
            );
        }
    }

    #[tokio::test]
    async fn test_batch_without_waiters_is_untouched() {
        let storage = InMemoryStorage::new();
        let mut member = Job::new("m-1", "work", None).scheduled(Utc::now());
        member.mark_succeeded(None);
        storage.store_batch("b-1", &[member]).await.unwrap();

        check_batch_completion(&storage, "b-1").await;

        let member = storage.get_job("m-1").await.unwrap().unwrap();
        assert_eq!(member.state, JobState::Succeeded);
    }
}
