//! Error types for the admission module

use thiserror::Error;

/// Errors raised while building or consulting admission state
///
/// Routine rejections (cooldown, concurrency) are NOT errors; they are
/// variants of [`super::guard::Admission`].
#[derive(Error, Debug)]
pub enum AdmissionError {
    /// A tier name read from the store or configuration did not parse
    #[error("unknown tier name: {name}")]
    UnknownTier { name: String },

    /// Tier table construction failed validation
    #[error("invalid tier table: {reason}")]
    InvalidTierTable { reason: String },
}
