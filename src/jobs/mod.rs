//! Job lifecycle: submission, execution and status tracking
//!
//! [`runner::JobRunner`] turns an accepted submission into a background
//! job; [`status::JobStatusStore`] records its progress where every
//! replica can read it.

pub mod runner;
pub mod status;

pub use runner::{JobContext, JobRunner, JobTicket, ProgressReporter, SubmitError, Workload, WorkloadError};
pub use status::{JobStatus, JobStatusRecord, JobStatusStore};
