//! Integration tests for the distributed admission controller
//!
//! These tests drive the full check-and-reserve / mark-finished / expiry
//! cycle against the in-memory store, covering the saturation, cooldown,
//! crash-recovery and cross-replica scenarios end to end.

mod common;

use std::sync::Arc;
use std::time::Duration;

use floodgate::admission::{keys, Admission, AdmissionGuard, Tier, TierTable};
use floodgate::store::{DynStore, ExpiryListener, MemoryStore, SharedStore, StoreError,
    StoreResult,
};

use common::{memory_guard, TEST_SAFETY_TTL};

// ============================================================================
// Single admission
// ============================================================================

#[tokio::test]
async fn test_single_small_admission() {
    let (store, guard) = memory_guard();

    let admission = guard.check_and_reserve("u1", 50, "J1").await.unwrap();
    assert_eq!(admission, Admission::Allowed { tier: Tier::Small });

    // Running set holds exactly the new job id
    let members = store
        .set_members("user:u1:SMALL:jobs")
        .await
        .unwrap();
    assert_eq!(members, vec!["J1".to_string()]);

    // Safety key is live, TTL-bounded, and names the tier
    assert!(store.exists("job:u1:SMALL:J1").await.unwrap());
    assert!(store.ttl_seconds("job:u1:SMALL:J1").await.unwrap() > 0);
    assert_eq!(
        store.get("job:u1:SMALL:J1").await.unwrap(),
        Some("SMALL".to_string())
    );

    // No cooldown for a clean admission
    assert!(!store.exists("user:u1:cooldown").await.unwrap());
}

// ============================================================================
// Saturation and cooldown
// ============================================================================

#[tokio::test]
async fn test_small_tier_saturation() {
    let (store, guard) = memory_guard();

    for i in 0..10 {
        let admission = guard
            .check_and_reserve("u1", 1, &format!("J{i}"))
            .await
            .unwrap();
        assert!(admission.is_allowed(), "admission {i} should succeed");
    }

    let eleventh = guard.check_and_reserve("u1", 1, "J10").await.unwrap();
    assert_eq!(
        eleventh,
        Admission::RejectedConcurrency {
            tier: Tier::Small,
            limit: 10
        }
    );

    assert_eq!(
        store.set_cardinality("user:u1:SMALL:jobs").await.unwrap(),
        10
    );
}

#[tokio::test]
async fn test_rejection_triggers_cooldown_across_tiers() {
    let (store, guard) = memory_guard();

    // Saturate SMALL and overflow it once
    for i in 0..10 {
        guard
            .check_and_reserve("u1", 1, &format!("J{i}"))
            .await
            .unwrap();
    }
    guard.check_and_reserve("u1", 1, "J10").await.unwrap();

    // Cooldown key exists, names SMALL and carries its 5 s window
    let cooldown_key = keys::cooldown_key("u1");
    assert_eq!(
        store.get(&cooldown_key).await.unwrap(),
        Some("SMALL".to_string())
    );
    let ttl = store.ttl_seconds(&cooldown_key).await.unwrap();
    assert!(ttl > 0 && ttl <= 5, "cooldown TTL was {ttl}");

    // A MEDIUM admission inside the window is blocked by the cooldown
    let blocked = guard.check_and_reserve("u1", 5_000, "JM").await.unwrap();
    match blocked {
        Admission::RejectedCooldown {
            tier,
            total_seconds,
            remaining_seconds,
        } => {
            assert_eq!(tier, Tier::Small);
            assert_eq!(total_seconds, 5);
            assert!(remaining_seconds <= 5);
        }
        other => panic!("expected cooldown rejection, got {other:?}"),
    }
    assert_eq!(
        store.set_cardinality("user:u1:MEDIUM:jobs").await.unwrap(),
        0
    );

    // Once the window passes, the same call succeeds
    store.force_expire(&cooldown_key);
    let admitted = guard.check_and_reserve("u1", 5_000, "JM2").await.unwrap();
    assert_eq!(admitted, Admission::Allowed { tier: Tier::Medium });
}

#[tokio::test]
async fn test_cooldown_gate_runs_before_reservation() {
    let (store, guard) = memory_guard();

    // Plant a cooldown directly; no prior admissions at all
    store
        .set_with_ttl(&keys::cooldown_key("u9"), "LARGE", Duration::from_secs(20))
        .await
        .unwrap();

    let blocked = guard.check_and_reserve("u9", 10, "J1").await.unwrap();
    assert!(matches!(blocked, Admission::RejectedCooldown { .. }));

    // The reservation step never ran, so no set was touched
    assert_eq!(
        store.set_cardinality("user:u9:SMALL:jobs").await.unwrap(),
        0
    );
}

// ============================================================================
// Crash recovery
// ============================================================================

#[tokio::test]
async fn test_crash_recovery_via_expiry_listener() {
    let (store, guard) = memory_guard();

    let admission = guard.check_and_reserve("u2", 50_000, "JL").await.unwrap();
    assert_eq!(admission, Admission::Allowed { tier: Tier::Large });

    // Simulate process death: the safety key expires without a release
    let safety = keys::safety_key("u2", Tier::Large, "JL");
    assert!(store.force_expire(&safety));

    let listener = ExpiryListener::new(store.clone() as DynStore);
    listener.handle_expired_key(&safety).await;

    // The orphan is gone and a fresh admission succeeds
    let members = store.set_members("user:u2:LARGE:jobs").await.unwrap();
    assert!(!members.contains(&"JL".to_string()));

    let again = guard.check_and_reserve("u2", 50_000, "JL2").await.unwrap();
    assert!(again.is_allowed());
}

#[tokio::test]
async fn test_malformed_expiry_events_change_nothing() {
    let (store, guard) = memory_guard();
    guard.check_and_reserve("u", 1, "J1").await.unwrap();

    let listener = ExpiryListener::new(store.clone() as DynStore);
    listener.handle_expired_key("job:weirdkey").await;
    listener.handle_expired_key("job:u:BOGUS:J1").await;

    assert_eq!(store.set_cardinality("user:u:SMALL:jobs").await.unwrap(), 1);
}

// ============================================================================
// Cross-replica behavior
// ============================================================================

#[tokio::test]
async fn test_cross_replica_race_admits_exactly_one() {
    let store = Arc::new(MemoryStore::new());

    // Two replicas: separate guards over the same store
    let replica_a = AdmissionGuard::new(
        store.clone() as DynStore,
        TierTable::default(),
        TEST_SAFETY_TTL,
    );
    let replica_b = AdmissionGuard::new(
        store.clone() as DynStore,
        TierTable::default(),
        TEST_SAFETY_TTL,
    );

    let (a, b) = tokio::join!(
        replica_a.check_and_reserve("u3", 500_000, "JA"),
        replica_b.check_and_reserve("u3", 500_000, "JB"),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(
        a.is_allowed(),
        b.is_allowed(),
        "exactly one of the two XL admissions must win: {a:?} / {b:?}"
    );
    assert_eq!(store.set_cardinality("user:u3:XL:jobs").await.unwrap(), 1);
}

#[tokio::test]
async fn test_concurrent_burst_never_exceeds_limit() {
    let store = Arc::new(MemoryStore::new());
    let guard = Arc::new(AdmissionGuard::new(
        store.clone() as DynStore,
        TierTable::default(),
        TEST_SAFETY_TTL,
    ));

    let mut handles = Vec::new();
    for i in 0..50 {
        let guard = guard.clone();
        handles.push(tokio::spawn(async move {
            guard
                .check_and_reserve("burst", 1, &format!("J{i}"))
                .await
                .unwrap()
                .is_allowed()
        }));
    }

    let mut allowed = 0;
    for handle in handles {
        if handle.await.unwrap() {
            allowed += 1;
        }
    }

    // SMALL admits at most 10, and the set agrees with the winners
    assert_eq!(allowed, 10);
    assert_eq!(
        store
            .set_cardinality("user:burst:SMALL:jobs")
            .await
            .unwrap(),
        10
    );
}

// ============================================================================
// Release semantics
// ============================================================================

#[tokio::test]
async fn test_every_finish_drains_the_running_set() {
    let (store, guard) = memory_guard();

    let mut jobs = Vec::new();
    for i in 0..5 {
        let job_id = format!("J{i}");
        guard.check_and_reserve("u5", 2_000, &job_id).await.unwrap();
        jobs.push(job_id);
    }
    assert_eq!(
        store.set_cardinality("user:u5:MEDIUM:jobs").await.unwrap(),
        5
    );

    for job_id in &jobs {
        guard.mark_finished("u5", Tier::Medium, job_id).await;
    }

    assert_eq!(
        store.set_cardinality("user:u5:MEDIUM:jobs").await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_mark_finished_repeats_are_no_ops() {
    let (store, guard) = memory_guard();
    guard.check_and_reserve("u6", 1, "J1").await.unwrap();

    guard.mark_finished("u6", Tier::Small, "J1").await;
    let after_first = store.set_cardinality("user:u6:SMALL:jobs").await.unwrap();

    guard.mark_finished("u6", Tier::Small, "J1").await;
    guard.mark_finished("u6", Tier::Small, "J1").await;
    let after_third = store.set_cardinality("user:u6:SMALL:jobs").await.unwrap();

    assert_eq!(after_first, 0);
    assert_eq!(after_first, after_third);
    assert!(!store.exists("job:u6:SMALL:J1").await.unwrap());
}

// ============================================================================
// Compensation on partial failure
// ============================================================================

/// Store wrapper whose TTL writes always fail, to exercise the rollback
/// path after a successful reservation
struct BrokenTtlStore {
    inner: Arc<MemoryStore>,
}

#[async_trait::async_trait]
impl SharedStore for BrokenTtlStore {
    async fn set_with_ttl(&self, _key: &str, _value: &str, _ttl: Duration) -> StoreResult<()> {
        Err(StoreError::Unavailable("ttl writes disabled".to_string()))
    }
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key).await
    }
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }
    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.delete(key).await
    }
    async fn ttl_seconds(&self, key: &str) -> StoreResult<u64> {
        self.inner.ttl_seconds(key).await
    }
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        self.inner.set_add(key, member).await
    }
    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        self.inner.set_remove(key, member).await
    }
    async fn set_cardinality(&self, key: &str) -> StoreResult<u64> {
        self.inner.set_cardinality(key).await
    }
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.inner.set_members(key).await
    }
    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.inner.scan_keys(pattern).await
    }
    async fn reserve_slot(
        &self,
        set_key: &str,
        limit: u32,
        member: &str,
    ) -> StoreResult<floodgate::store::ReservationVerdict> {
        self.inner.reserve_slot(set_key, limit, member).await
    }
}

#[tokio::test]
async fn test_failed_safety_key_write_rolls_back_reservation() {
    let inner = Arc::new(MemoryStore::new());
    let broken = Arc::new(BrokenTtlStore {
        inner: inner.clone(),
    });
    let guard = AdmissionGuard::new(
        broken as DynStore,
        TierTable::default(),
        TEST_SAFETY_TTL,
    );

    let result = guard.check_and_reserve("u7", 10, "J1").await;
    assert!(result.is_err());

    // The reservation the script granted was compensated away
    assert_eq!(
        inner.set_cardinality("user:u7:SMALL:jobs").await.unwrap(),
        0
    );
}
