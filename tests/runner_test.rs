//! Integration tests for the job runner lifecycle
//!
//! Every exit path (completion, workload failure, panic) must leave a
//! terminal status record and release the reservation exactly once.

mod common;

use std::sync::Arc;

use floodgate::jobs::{JobRunner, JobStatus, JobStatusStore, SubmitError, Workload};
use floodgate::store::{MemoryStore, SharedStore};

use common::{
    memory_guard, status_store, wait_for_terminal, FailingWorkload, InstantWorkload,
    PanickingWorkload, SteppedWorkload,
};

fn runner_with(
    workload: Arc<dyn Workload>,
) -> (Arc<MemoryStore>, Arc<JobStatusStore>, Arc<JobRunner>) {
    let (store, guard) = memory_guard();
    let status = status_store(&store);
    let runner = Arc::new(JobRunner::new(guard, status.clone(), workload, 4));
    (store, status, runner)
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_completed_job_reports_final_count_and_releases() {
    let (store, status, runner) = runner_with(Arc::new(InstantWorkload));

    let ticket = runner.submit("u1", 50).await.unwrap();
    assert_eq!(ticket.status, JobStatus::Pending);

    let record = wait_for_terminal(&status, &ticket.job_id).await;
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.processed_count, 50);
    assert_eq!(record.progress_percent(), 100);
    assert!(record.finished_at.is_some());

    // Reservation fully released
    assert_eq!(
        store.set_cardinality("user:u1:SMALL:jobs").await.unwrap(),
        0
    );
    assert!(
        !store
            .exists(&format!("job:u1:SMALL:{}", ticket.job_id))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_progress_reaches_status_store() {
    let (_store, status, runner) = runner_with(Arc::new(SteppedWorkload { step: 100 }));

    let ticket = runner.submit("u2", 1_000).await.unwrap();
    let record = wait_for_terminal(&status, &ticket.job_id).await;

    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.processed_count, 1_000);
}

// ============================================================================
// Failure paths
// ============================================================================

#[tokio::test]
async fn test_failed_workload_still_releases_reservation() {
    let (store, status, runner) = runner_with(Arc::new(FailingWorkload));

    let ticket = runner.submit("u3", 20_000).await.unwrap();
    let record = wait_for_terminal(&status, &ticket.job_id).await;

    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.message.contains("source exploded"));

    assert_eq!(
        store.set_cardinality("user:u3:LARGE:jobs").await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_panicking_workload_still_releases_reservation() {
    let (store, status, runner) = runner_with(Arc::new(PanickingWorkload));

    let ticket = runner.submit("u4", 5).await.unwrap();
    let record = wait_for_terminal(&status, &ticket.job_id).await;

    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.message.contains("panicked"));

    assert_eq!(
        store.set_cardinality("user:u4:SMALL:jobs").await.unwrap(),
        0
    );
}

// ============================================================================
// Rejection paths
// ============================================================================

#[tokio::test]
async fn test_rejected_submission_leaves_no_status_record() {
    // A workload slow enough to hold its XL slot during the second submit
    let (store, status, runner) = runner_with(Arc::new(SteppedWorkload { step: 1 }));

    let first = runner.submit("u5", 200_000).await.unwrap();

    let second = runner.submit("u5", 200_000).await;
    match second {
        Err(SubmitError::TooManyRequests { tier, limit }) => {
            assert_eq!(tier.name(), "XL");
            assert_eq!(limit, 1);
        }
        other => panic!("expected concurrency rejection, got {other:?}"),
    }

    // Only the first job ever existed
    assert!(status.get(&first.job_id).await.unwrap().is_some());
    assert_eq!(store.set_cardinality("user:u5:XL:jobs").await.unwrap(), 1);
}

#[tokio::test]
async fn test_cooldown_rejection_carries_window() {
    let (_store, _status, runner) = runner_with(Arc::new(SteppedWorkload { step: 1 }));

    // Hold the single XL slot, then overflow it to start the cooldown
    runner.submit("u6", 200_000).await.unwrap();
    let overflow = runner.submit("u6", 200_000).await;
    assert!(matches!(overflow, Err(SubmitError::TooManyRequests { .. })));

    // The next attempt lands in the cooldown window
    let blocked = runner.submit("u6", 10).await;
    match blocked {
        Err(SubmitError::CooldownActive {
            total_seconds,
            remaining_seconds,
            ..
        }) => {
            assert_eq!(total_seconds, 30);
            assert!(remaining_seconds <= 30);
        }
        other => panic!("expected cooldown rejection, got {other:?}"),
    }
}
