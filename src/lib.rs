//! floodgate - Bulk user-import service with distributed admission control
//!
//! Accepts bulk import jobs and admits them subject to per-user, per-tier
//! concurrency limits and a global per-user cooldown. Admission decisions
//! go through a shared Redis store so every replica observes one
//! consistent view of in-flight work, and TTL-driven expiry notifications
//! heal state left behind by crashed replicas.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`admission`] - Tier classification and the check-and-reserve guard
//! - [`store`] - Shared-store client (Redis and in-memory) plus the
//!   expiry listener and sweeper
//! - [`jobs`] - Job runner, workload seam and status tracking
//! - [`importer`] - The production workload: fetch users from the source
//!   API and persist them in batches
//! - [`server`] - HTTP surface for submissions and status queries
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use floodgate::admission::{AdmissionGuard, TierTable};
//! use floodgate::store::{DynStore, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(MemoryStore::new()) as DynStore;
//!     let guard = AdmissionGuard::new(store, TierTable::default(), Duration::from_secs(900));
//!
//!     let admission = guard.check_and_reserve("u1", 50, "job-1").await?;
//!     assert!(admission.is_allowed());
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod config;
pub mod error;
pub mod importer;
pub mod jobs;
pub mod metrics;
pub mod server;
pub mod store;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::admission::{Admission, AdmissionGuard, Tier, TierTable};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::jobs::{JobRunner, JobStatus, JobStatusStore, Workload};
    pub use crate::store::{DynStore, MemoryStore, RedisStore, SharedStore};
}

// Direct re-exports for convenience
pub use admission::{Admission, AdmissionGuard, Tier, TierTable};
pub use error::{Error, Result};
