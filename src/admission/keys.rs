//! Shared-store key formats for admission state
//!
//! Every key the admission controller touches is built here. Keys are
//! colon-separated; user ids and job ids are opaque text and must never
//! contain colons (enforced at the HTTP boundary).

use super::tier::Tier;

/// Set of currently admitted job ids for a (user, tier) pair
///
/// The set's cardinality is the authoritative concurrency count. The set
/// itself carries no TTL; stale members are removed by the expiry listener
/// or the sweeper.
pub fn running_jobs_key(user_id: &str, tier: Tier) -> String {
    format!("user:{}:{}:jobs", user_id, tier.name())
}

/// Per-job safety key; presence means the reservation is live
///
/// Carries the tier name as value and the max-job-lifetime TTL. Its expiry
/// is the crash signal that drives self-healing cleanup.
pub fn safety_key(user_id: &str, tier: Tier, job_id: &str) -> String {
    format!("job:{}:{}:{}", user_id, tier.name(), job_id)
}

/// Per-user cooldown key; presence blocks every admission attempt
pub fn cooldown_key(user_id: &str) -> String {
    format!("user:{}:cooldown", user_id)
}

/// Job status record key
pub fn job_status_key(job_id: &str) -> String {
    format!("jobstatus:{job_id}")
}

/// Prefix shared by all safety keys, used to filter expiry notifications
pub const SAFETY_KEY_PREFIX: &str = "job:";

/// Scan pattern matching every running-set key
pub const RUNNING_SET_SCAN_PATTERN: &str = "user:*:jobs";
