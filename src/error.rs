//! Unified error handling for the floodgate crate
//!
//! Each module owns its specific error type; this enum consolidates them
//! for callers that cross module boundaries. Routine admission rejections
//! are not errors; they are [`crate::admission::Admission`] variants.

use thiserror::Error;

pub use crate::admission::AdmissionError;
pub use crate::importer::SourceError;
pub use crate::jobs::{SubmitError, WorkloadError};
pub use crate::store::StoreError;

/// Unified error type for the floodgate crate
#[derive(Error, Debug)]
pub enum Error {
    /// Shared store failures
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Admission configuration or parsing failures
    #[error("Admission error: {0}")]
    Admission(#[from] AdmissionError),

    /// Job submission failures
    #[error("Submit error: {0}")]
    Submit(#[from] SubmitError),

    /// Workload execution failures
    #[error("Workload error: {0}")]
    Workload(#[from] WorkloadError),

    /// User source API failures
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether retrying the same call may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Store(_) => true,
            Self::Source(SourceError::Http(_) | SourceError::Status(_)) => true,
            Self::Source(SourceError::EmptyBatch) => false,
            Self::Submit(SubmitError::Store(_)) => true,
            Self::Submit(_) => false,
            Self::Admission(_) => false,
            Self::Workload(_) => false,
            Self::Json(_) => false,
            Self::Io(_) => true,
            Self::Config(_) => false,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
