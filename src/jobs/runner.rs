//! Asynchronous job execution
//!
//! The runner owns the full job lifecycle: generate an id, win admission,
//! record PENDING, execute the workload on a bounded worker pool and, on
//! every exit path (success, workload failure or panic) write the
//! terminal status and release the reservation exactly once.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use crate::admission::{Admission, AdmissionGuard, Tier};
use crate::metrics;
use crate::store::StoreError;

use super::status::{JobStatus, JobStatusRecord, JobStatusStore};

// ============================================================================
// Workload seam
// ============================================================================

/// Identity of a job handed to a workload
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    pub user_id: String,
    pub tier: Tier,
    pub requested_count: u64,
}

/// Channel handle a workload uses to publish processed counts
///
/// Reports are cheap and non-blocking; the runner folds them into the
/// status store. A dropped runner simply discards further reports.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<u64>,
}

impl ProgressReporter {
    pub fn report(&self, processed_count: u64) {
        let _ = self.tx.send(processed_count);
    }
}

/// Workload execution failure
#[derive(Error, Debug)]
#[error("{0}")]
pub struct WorkloadError(pub String);

impl WorkloadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The actual work an admitted job performs
///
/// Returns the final processed count. Implementations should publish
/// intermediate counts through the reporter at a reasonable interval.
#[async_trait::async_trait]
pub trait Workload: Send + Sync {
    async fn run(&self, job: JobContext, progress: ProgressReporter)
        -> Result<u64, WorkloadError>;
}

// ============================================================================
// Submission results
// ============================================================================

/// Receipt returned to the caller of a successful submission
#[derive(Debug, Clone)]
pub struct JobTicket {
    pub job_id: String,
    pub tier: Tier,
    pub status: JobStatus,
}

/// Why a submission was not accepted
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("{tier} concurrency limit reached. Max allowed = {limit}")]
    TooManyRequests { tier: Tier, limit: u32 },

    #[error("user is in cooldown for another {remaining_seconds}s")]
    CooldownActive {
        tier: Tier,
        total_seconds: u64,
        remaining_seconds: u64,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// Runner
// ============================================================================

/// Executes admitted jobs on a bounded worker pool
pub struct JobRunner {
    guard: Arc<AdmissionGuard>,
    status: Arc<JobStatusStore>,
    workload: Arc<dyn Workload>,
    permits: Arc<Semaphore>,
}

impl JobRunner {
    pub fn new(
        guard: Arc<AdmissionGuard>,
        status: Arc<JobStatusStore>,
        workload: Arc<dyn Workload>,
        worker_pool_size: usize,
    ) -> Self {
        Self {
            guard,
            status,
            workload,
            permits: Arc::new(Semaphore::new(worker_pool_size.max(1))),
        }
    }

    /// Admit and launch a job
    ///
    /// Returns as soon as the reservation is held and the PENDING record
    /// is written; execution continues in the background.
    pub async fn submit(&self, user_id: &str, requested_count: u64) -> Result<JobTicket, SubmitError> {
        let job_id = Uuid::new_v4().to_string();

        let tier = match self
            .guard
            .check_and_reserve(user_id, requested_count, &job_id)
            .await?
        {
            Admission::Allowed { tier } => tier,
            Admission::RejectedConcurrency { tier, limit } => {
                return Err(SubmitError::TooManyRequests { tier, limit });
            }
            Admission::RejectedCooldown {
                tier,
                total_seconds,
                remaining_seconds,
            } => {
                return Err(SubmitError::CooldownActive {
                    tier,
                    total_seconds,
                    remaining_seconds,
                });
            }
        };

        let record = JobStatusRecord::pending(&job_id, user_id, tier, requested_count);
        if let Err(e) = self.status.put(&record).await {
            // The job cannot be tracked; release the slot rather than run blind
            self.guard.mark_finished(user_id, tier, &job_id).await;
            return Err(e.into());
        }

        let ticket = JobTicket {
            job_id: job_id.clone(),
            tier,
            status: JobStatus::Pending,
        };

        let guard = self.guard.clone();
        let status = self.status.clone();
        let workload = self.workload.clone();
        let permits = self.permits.clone();
        tokio::spawn(async move {
            execute(guard, status, workload, permits, record).await;
        });

        Ok(ticket)
    }
}

/// Drive one job to a terminal state
///
/// The workload runs in its own task so a panic surfaces here as a join
/// error instead of tearing down the lifecycle bookkeeping around it.
async fn execute(
    guard: Arc<AdmissionGuard>,
    status: Arc<JobStatusStore>,
    workload: Arc<dyn Workload>,
    permits: Arc<Semaphore>,
    mut record: JobStatusRecord,
) {
    let _permit = match permits.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            // Pool closed during shutdown; release and bail
            guard
                .mark_finished(&record.user_id, record.tier, &record.job_id)
                .await;
            return;
        }
    };

    metrics::set_jobs_running_delta(1);
    let started = Instant::now();

    record.status = JobStatus::InProgress;
    record.message = "Import in progress".to_string();
    if let Err(e) = status.put(&record).await {
        tracing::warn!(job_id = %record.job_id, error = %e, "Failed to write IN_PROGRESS status");
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let reporter = ProgressReporter { tx };
    let context = JobContext {
        job_id: record.job_id.clone(),
        user_id: record.user_id.clone(),
        tier: record.tier,
        requested_count: record.requested_count,
    };

    let mut handle = tokio::spawn({
        let workload = workload.clone();
        async move { workload.run(context, reporter).await }
    });

    // Fold progress reports into the record while the workload runs
    let mut progress_open = true;
    let outcome = loop {
        tokio::select! {
            joined = &mut handle => break joined,
            received = rx.recv(), if progress_open => match received {
                Some(processed) => {
                    record.processed_count = processed;
                    if let Err(e) = status.put(&record).await {
                        tracing::warn!(job_id = %record.job_id, error = %e, "Failed to write progress");
                    }
                }
                // Reporter dropped early; only the join is left to wait on
                None => progress_open = false,
            }
        }
    };
    while let Ok(processed) = rx.try_recv() {
        record.processed_count = processed;
    }

    record.finished_at = Some(chrono::Utc::now());
    match outcome {
        Ok(Ok(final_count)) => {
            record.status = JobStatus::Completed;
            record.processed_count = final_count;
            record.message = format!("Imported {final_count} users");
            metrics::record_job_finished(record.tier.name(), "completed", started.elapsed());
            tracing::info!(
                job_id = %record.job_id,
                user_id = %record.user_id,
                imported = final_count,
                "Import job completed"
            );
        }
        Ok(Err(e)) => {
            record.status = JobStatus::Failed;
            record.message = e.to_string();
            metrics::record_job_finished(record.tier.name(), "failed", started.elapsed());
            tracing::warn!(job_id = %record.job_id, error = %e, "Import job failed");
        }
        Err(join_error) => {
            record.status = JobStatus::Failed;
            record.message = if join_error.is_panic() {
                "Import job panicked".to_string()
            } else {
                "Import job was cancelled".to_string()
            };
            metrics::record_job_finished(record.tier.name(), "failed", started.elapsed());
            tracing::error!(job_id = %record.job_id, error = %join_error, "Import job aborted");
        }
    }

    if let Err(e) = status.put(&record).await {
        tracing::warn!(job_id = %record.job_id, error = %e, "Failed to write terminal status");
    }

    // Every exit path above funnels through this single release
    guard
        .mark_finished(&record.user_id, record.tier, &record.job_id)
        .await;
    metrics::set_jobs_running_delta(-1);
}
