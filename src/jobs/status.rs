//! Job status records
//!
//! Progress and terminal state for every submitted job, keyed by job id
//! in the shared store so any replica can answer a status query. Writes
//! are last-writer-wins; records expire after a retention window.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::admission::keys::job_status_key;
use crate::admission::Tier;
use crate::store::{DynStore, StoreError, StoreResult};

// ============================================================================
// Status types
// ============================================================================

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether the job can no longer change state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Full status record for one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusRecord {
    pub job_id: String,
    pub user_id: String,
    pub tier: Tier,
    pub status: JobStatus,
    pub requested_count: u64,
    pub processed_count: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub message: String,
}

impl JobStatusRecord {
    /// Fresh record for a just-admitted job
    pub fn pending(job_id: &str, user_id: &str, tier: Tier, requested_count: u64) -> Self {
        Self {
            job_id: job_id.to_string(),
            user_id: user_id.to_string(),
            tier,
            status: JobStatus::Pending,
            requested_count,
            processed_count: 0,
            started_at: Utc::now(),
            finished_at: None,
            message: "Import job accepted".to_string(),
        }
    }

    /// Completion percentage, clamped to 0–100
    pub fn progress_percent(&self) -> u8 {
        if self.requested_count == 0 {
            return 100;
        }
        ((self.processed_count * 100) / self.requested_count).min(100) as u8
    }
}

// ============================================================================
// Status store
// ============================================================================

/// Shared-store-backed map from job id to status record
pub struct JobStatusStore {
    store: DynStore,
    retention: Duration,
}

impl JobStatusStore {
    pub fn new(store: DynStore, retention: Duration) -> Self {
        Self { store, retention }
    }

    /// Write (or overwrite) a job's record
    pub async fn put(&self, record: &JobStatusRecord) -> StoreResult<()> {
        let encoded = serde_json::to_string(record)
            .map_err(|e| StoreError::Unavailable(format!("encode job status: {e}")))?;
        self.store
            .set_with_ttl(&job_status_key(&record.job_id), &encoded, self.retention)
            .await
    }

    /// Read a job's latest record
    pub async fn get(&self, job_id: &str) -> StoreResult<Option<JobStatusRecord>> {
        let Some(raw) = self.store.get(&job_status_key(job_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Undecodable job status record");
                Ok(None)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
