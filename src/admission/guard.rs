//! Admission decisions for import jobs
//!
//! The guard decides whether a user may start a new import job. The
//! decision order is fixed: global cooldown first, then the tier's
//! concurrency limit via the store-side atomic reservation, then the
//! per-job safety key. Cooldown before reservation means an
//! admitted-then-blocked sequence cannot occur; reservation before the
//! safety key means a crash between the two leaves an orphaned set member
//! (cleaned by the expiry listener) rather than a phantom safety key.

use std::time::Duration;

use crate::metrics;
use crate::store::{DynStore, ReservationVerdict, StoreResult};

use super::keys;
use super::tier::{Tier, TierTable};

// ============================================================================
// Admission outcome
// ============================================================================

/// Outcome of an admission attempt
///
/// Rejections are routine outcomes, not errors; only store failures
/// surface as `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Slot reserved; the caller must eventually call `mark_finished`
    Allowed { tier: Tier },

    /// The tier's concurrency limit is full
    RejectedConcurrency { tier: Tier, limit: u32 },

    /// The user is in a global cooldown window
    RejectedCooldown {
        /// Tier whose overflow triggered the cooldown
        tier: Tier,
        total_seconds: u64,
        remaining_seconds: u64,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

// ============================================================================
// Guard
// ============================================================================

/// Decides admission and releases finished reservations
///
/// Stateless apart from its store handle; every replica runs one and they
/// all observe the same admission state.
pub struct AdmissionGuard {
    store: DynStore,
    tiers: TierTable,
    safety_key_ttl: Duration,
}

impl AdmissionGuard {
    pub fn new(store: DynStore, tiers: TierTable, safety_key_ttl: Duration) -> Self {
        Self {
            store,
            tiers,
            safety_key_ttl,
        }
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    /// Classify the request, enforce cooldown and concurrency, and reserve
    /// a slot for `job_id`
    ///
    /// On [`Admission::Allowed`] the running set contains `job_id` and its
    /// safety key is live. If the safety-key write fails the reservation
    /// is rolled back before the error surfaces, so a failed call never
    /// holds a slot.
    pub async fn check_and_reserve(
        &self,
        user_id: &str,
        requested_count: u64,
        job_id: &str,
    ) -> StoreResult<Admission> {
        let tier = self.tiers.classify(requested_count);

        if let Some(cooldown) = self.active_cooldown(user_id).await? {
            metrics::record_admission_rejected(tier.name(), "cooldown");
            return Ok(cooldown);
        }

        let running_key = keys::running_jobs_key(user_id, tier);
        let limit = self.tiers.max_concurrent(tier);
        let verdict = self.store.reserve_slot(&running_key, limit, job_id).await?;

        if verdict == ReservationVerdict::Rejected {
            self.start_cooldown(user_id, tier).await;
            metrics::record_admission_rejected(tier.name(), "concurrency");
            tracing::info!(
                user_id = %user_id,
                tier = %tier,
                limit = limit,
                "Concurrency limit reached"
            );
            return Ok(Admission::RejectedConcurrency { tier, limit });
        }

        let safety = keys::safety_key(user_id, tier, job_id);
        if let Err(e) = self
            .store
            .set_with_ttl(&safety, tier.name(), self.safety_key_ttl)
            .await
        {
            // Without a safety key the reservation has no crash signal;
            // roll it back before surfacing the failure.
            if let Err(comp) = self.store.set_remove(&running_key, job_id).await {
                tracing::error!(
                    user_id = %user_id,
                    tier = %tier,
                    job_id = %job_id,
                    error = %comp,
                    "Failed to roll back reservation; sweeper will reclaim the slot"
                );
            }
            return Err(e);
        }

        metrics::record_admission_allowed(tier.name());
        tracing::info!(
            user_id = %user_id,
            tier = %tier,
            job_id = %job_id,
            "Reservation granted"
        );
        Ok(Admission::Allowed { tier })
    }

    /// Release a reservation
    ///
    /// Safe to call repeatedly and safe to call for reservations that
    /// never succeeded; both underlying operations are idempotent. Store
    /// failures are logged and dropped; the expiry listener and sweeper
    /// are the backstop for missed releases.
    pub async fn mark_finished(&self, user_id: &str, tier: Tier, job_id: &str) {
        let safety = keys::safety_key(user_id, tier, job_id);
        if let Err(e) = self.store.delete(&safety).await {
            tracing::warn!(key = %safety, error = %e, "Failed to delete safety key");
        }

        let running_key = keys::running_jobs_key(user_id, tier);
        if let Err(e) = self.store.set_remove(&running_key, job_id).await {
            tracing::warn!(key = %running_key, job_id = %job_id, error = %e, "Failed to remove running-set member");
        }

        tracing::info!(user_id = %user_id, tier = %tier, job_id = %job_id, "Reservation released");
    }

    /// Read the user's cooldown state, if any
    async fn active_cooldown(&self, user_id: &str) -> StoreResult<Option<Admission>> {
        let key = keys::cooldown_key(user_id);
        if !self.store.exists(&key).await? {
            return Ok(None);
        }

        let remaining_seconds = self.store.ttl_seconds(&key).await?;
        // The value names the tier whose overflow started the cooldown;
        // if it expired between the two reads, err toward admitting.
        let Some(value) = self.store.get(&key).await? else {
            return Ok(None);
        };
        let tier = match Tier::from_name(&value) {
            Ok(tier) => tier,
            Err(_) => {
                tracing::warn!(user_id = %user_id, value = %value, "Cooldown key holds unknown tier, ignoring");
                return Ok(None);
            }
        };

        Ok(Some(Admission::RejectedCooldown {
            tier,
            total_seconds: self.tiers.cooldown_seconds(tier),
            remaining_seconds,
        }))
    }

    /// Start the post-overflow cooldown window
    ///
    /// Written only when the atomic reservation rejects; the duration
    /// depends on the tier that overflowed. Best-effort: a failed write
    /// only shortens the user's wait.
    async fn start_cooldown(&self, user_id: &str, tier: Tier) {
        let cooldown_seconds = self.tiers.cooldown_seconds(tier);
        if cooldown_seconds == 0 {
            return;
        }

        let key = keys::cooldown_key(user_id);
        if let Err(e) = self
            .store
            .set_with_ttl(&key, tier.name(), Duration::from_secs(cooldown_seconds))
            .await
        {
            tracing::warn!(user_id = %user_id, tier = %tier, error = %e, "Failed to write cooldown key");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
