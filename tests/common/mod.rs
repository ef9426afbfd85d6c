//! Shared helpers for integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use floodgate::admission::{AdmissionGuard, TierTable};
use floodgate::jobs::{
    JobContext, JobStatusRecord, JobStatusStore, ProgressReporter, Workload, WorkloadError,
};
use floodgate::store::{DynStore, MemoryStore};

/// Safety TTL used across tests; long enough to never expire mid-test
pub const TEST_SAFETY_TTL: Duration = Duration::from_secs(900);

/// Fresh in-memory store plus a guard over it
pub fn memory_guard() -> (Arc<MemoryStore>, Arc<AdmissionGuard>) {
    let store = Arc::new(MemoryStore::new());
    let guard = Arc::new(AdmissionGuard::new(
        store.clone() as DynStore,
        TierTable::default(),
        TEST_SAFETY_TTL,
    ));
    (store, guard)
}

/// Status store over the same memory store
pub fn status_store(store: &Arc<MemoryStore>) -> Arc<JobStatusStore> {
    Arc::new(JobStatusStore::new(
        store.clone() as DynStore,
        Duration::from_secs(3600),
    ))
}

/// Poll the status store until the job reaches a terminal state
pub async fn wait_for_terminal(status: &JobStatusStore, job_id: &str) -> JobStatusRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(record) = status.get(job_id).await.unwrap() {
            if record.status.is_terminal() {
                return record;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {job_id} never reached a terminal state"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// Scripted workloads
// ============================================================================

/// Workload that processes everything instantly
pub struct InstantWorkload;

#[async_trait::async_trait]
impl Workload for InstantWorkload {
    async fn run(
        &self,
        job: JobContext,
        progress: ProgressReporter,
    ) -> Result<u64, WorkloadError> {
        progress.report(job.requested_count);
        Ok(job.requested_count)
    }
}

/// Workload that reports progress in fixed steps before finishing
pub struct SteppedWorkload {
    pub step: u64,
}

#[async_trait::async_trait]
impl Workload for SteppedWorkload {
    async fn run(
        &self,
        job: JobContext,
        progress: ProgressReporter,
    ) -> Result<u64, WorkloadError> {
        let mut processed = 0;
        while processed < job.requested_count {
            processed = (processed + self.step).min(job.requested_count);
            progress.report(processed);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        Ok(processed)
    }
}

/// Workload that always fails
pub struct FailingWorkload;

#[async_trait::async_trait]
impl Workload for FailingWorkload {
    async fn run(
        &self,
        _job: JobContext,
        _progress: ProgressReporter,
    ) -> Result<u64, WorkloadError> {
        Err(WorkloadError::new("source exploded"))
    }
}

/// Workload that panics mid-flight
pub struct PanickingWorkload;

#[async_trait::async_trait]
impl Workload for PanickingWorkload {
    async fn run(
        &self,
        _job: JobContext,
        _progress: ProgressReporter,
    ) -> Result<u64, WorkloadError> {
        panic!("workload blew up");
    }
}
