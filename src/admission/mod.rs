//! Distributed admission control for import jobs
//!
//! Multiple service replicas accept import submissions; this module makes
//! them agree on who may run. All state lives in the shared store:
//!
//! - a running set per (user, tier) whose cardinality is the concurrency
//!   count,
//! - a TTL-bounded safety key per job whose expiry signals a crash,
//! - a TTL-bounded cooldown key per user written when a tier overflows.
//!
//! [`guard::AdmissionGuard`] is the decision engine; [`tier`] holds the
//! cost model; [`keys`] is the single source of truth for key formats.

pub mod error;
pub mod guard;
pub mod keys;
pub mod tier;

pub use error::AdmissionError;
pub use guard::{Admission, AdmissionGuard};
pub use tier::{Tier, TierLimits, TierTable};
