//! Bulk user-import workload
//!
//! The production [`crate::jobs::Workload`]: fetch users from the source
//! API in batches and persist each batch in its own transaction, publishing
//! progress between batches.

pub mod client;
pub mod repository;

use std::sync::Arc;

use crate::jobs::{JobContext, ProgressReporter, Workload, WorkloadError};
use crate::metrics;

pub use client::{ImportedUser, SourceConfig, SourceError, UserSourceClient};
pub use repository::{RepositoryConfig, UserRepository};

// ============================================================================
// Import workload
// ============================================================================

/// Fetch-then-insert import pipeline
pub struct ImportWorkload {
    client: Arc<UserSourceClient>,
    repository: Arc<UserRepository>,

    /// Users fetched and inserted per batch
    batch_size: u32,

    /// Batches between progress reports
    progress_interval: u32,
}

impl ImportWorkload {
    pub fn new(
        client: Arc<UserSourceClient>,
        repository: Arc<UserRepository>,
        batch_size: u32,
        progress_interval: u32,
    ) -> Self {
        Self {
            client,
            repository,
            batch_size: batch_size.max(1),
            progress_interval: progress_interval.max(1),
        }
    }
}

#[async_trait::async_trait]
impl Workload for ImportWorkload {
    async fn run(
        &self,
        job: JobContext,
        progress: ProgressReporter,
    ) -> Result<u64, WorkloadError> {
        let mut processed: u64 = 0;
        let mut batches_since_report: u32 = 0;

        while processed < job.requested_count {
            let remaining = job.requested_count - processed;
            let batch_size = remaining.min(u64::from(self.batch_size)) as u32;

            let users = self
                .client
                .fetch_batch(batch_size)
                .await
                .map_err(|e| WorkloadError::new(format!("fetching users: {e}")))?;

            self.repository
                .insert_batch(&users)
                .await
                .map_err(|e| WorkloadError::new(format!("persisting users: {e}")))?;

            processed += users.len() as u64;
            metrics::record_users_imported(users.len() as u64);

            batches_since_report += 1;
            if batches_since_report >= self.progress_interval {
                progress.report(processed);
                batches_since_report = 0;
            }
        }

        progress.report(processed);
        Ok(processed)
    }
}
