//! Prometheus metrics for admission control and job execution
//!
//! This module provides metrics tracking for:
//! - Admission: allowed and rejected reservations by tier
//! - Jobs: running gauge, duration histogram, imported-user counter
//! - Self-healing: expiry-listener and sweeper cleanup counters

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};

// ============================================================================
// Admission Metrics
// ============================================================================

lazy_static! {
    pub static ref ADMISSION_ALLOWED: CounterVec =
        register_counter_vec!(
            "floodgate_admission_allowed_total",
            "Total reservations granted, by tier",
            &["tier"]
        ).unwrap();

    pub static ref ADMISSION_REJECTED: CounterVec =
        register_counter_vec!(
            "floodgate_admission_rejected_total",
            "Total admissions rejected, by tier and reason",
            &["tier", "reason"]
        ).unwrap();
}

// ============================================================================
// Job Metrics
// ============================================================================

lazy_static! {
    pub static ref JOBS_RUNNING: Gauge =
        register_gauge!(
            "floodgate_jobs_running",
            "Import jobs currently executing on this replica"
        ).unwrap();

    pub static ref JOB_DURATION: HistogramVec =
        register_histogram_vec!(
            "floodgate_job_duration_seconds",
            "Wall-clock job duration in seconds, by tier and outcome",
            &["tier", "outcome"],
            vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]
        ).unwrap();

    pub static ref USERS_IMPORTED: Counter =
        register_counter!(
            "floodgate_users_imported_total",
            "Total users written by import workloads"
        ).unwrap();
}

// ============================================================================
// Self-Healing Metrics
// ============================================================================

lazy_static! {
    pub static ref EXPIRY_CLEANUPS: CounterVec =
        register_counter_vec!(
            "floodgate_expiry_cleanups_total",
            "Stale running-set members removed by the expiry listener",
            &["tier"]
        ).unwrap();

    pub static ref SWEEPER_REMOVALS: CounterVec =
        register_counter_vec!(
            "floodgate_sweeper_removals_total",
            "Orphaned running-set members removed by the sweeper",
            &["tier"]
        ).unwrap();
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record a granted reservation
pub fn record_admission_allowed(tier: &str) {
    ADMISSION_ALLOWED.with_label_values(&[tier]).inc();
}

/// Record a rejected admission
pub fn record_admission_rejected(tier: &str, reason: &str) {
    ADMISSION_REJECTED.with_label_values(&[tier, reason]).inc();
}

/// Adjust the running-jobs gauge
pub fn set_jobs_running_delta(delta: i64) {
    JOBS_RUNNING.add(delta as f64);
}

/// Record a finished job
pub fn record_job_finished(tier: &str, outcome: &str, elapsed: std::time::Duration) {
    JOB_DURATION
        .with_label_values(&[tier, outcome])
        .observe(elapsed.as_secs_f64());
}

/// Record users written by a workload batch
pub fn record_users_imported(count: u64) {
    if count > 0 {
        USERS_IMPORTED.inc_by(count as f64);
    }
}

/// Record an expiry-listener cleanup
pub fn record_expiry_cleanup(tier: &str) {
    EXPIRY_CLEANUPS.with_label_values(&[tier]).inc();
}

/// Record a sweeper removal
pub fn record_sweeper_removal(tier: &str) {
    SWEEPER_REMOVALS.with_label_values(&[tier]).inc();
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics() {
        record_admission_allowed("SMALL");
        let result = encode_metrics();
        assert!(result.is_ok());
        let text = result.unwrap();
        assert!(text.contains("floodgate_"));
    }

    #[test]
    fn test_admission_counters() {
        let before = ADMISSION_REJECTED
            .with_label_values(&["XL", "concurrency"])
            .get();
        record_admission_rejected("XL", "concurrency");
        let after = ADMISSION_REJECTED
            .with_label_values(&["XL", "concurrency"])
            .get();
        assert!(after > before);
    }

    #[test]
    fn test_jobs_running_gauge() {
        set_jobs_running_delta(1);
        set_jobs_running_delta(-1);
        // Verify it doesn't panic
    }

    #[test]
    fn test_job_duration_recording() {
        record_job_finished("MEDIUM", "completed", std::time::Duration::from_millis(250));
        // Verify it doesn't panic
    }
}
