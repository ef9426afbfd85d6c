//! Crash recovery for orphaned reservations
//!
//! A reservation normally ends with an explicit release that deletes the
//! job's safety key and removes it from the running set. When a replica
//! dies mid-job, only the safety key's TTL fires: Redis publishes the
//! expired key name, the [`ExpiryListener`] parses it and removes the
//! orphaned member from the running set.
//!
//! Key-expiry notifications are best-effort; a missed event would leave a
//! slot blocked for good. The [`Sweeper`] closes that gap: on a slow
//! interval it scans every running set, probes each member's safety key
//! and removes members whose safety key is gone.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;

use crate::admission::keys::{RUNNING_SET_SCAN_PATTERN, SAFETY_KEY_PREFIX};
use crate::admission::tier::Tier;
use crate::metrics;
use crate::utils::retry::RetryConfig;

use super::{DynStore, StoreResult};

/// Redis pattern delivering every expired key name
const EXPIRY_CHANNEL_PATTERN: &str = "__keyevent@*__:expired";

// ============================================================================
// Expiry listener
// ============================================================================

/// Removes orphaned running-set members when safety keys expire
pub struct ExpiryListener {
    store: DynStore,
}

impl ExpiryListener {
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }

    /// Process one expired key name
    ///
    /// Only well-formed safety keys (`job:{user}:{TIER}:{jobId}`) trigger
    /// cleanup; everything else is logged and ignored. Idempotent and safe
    /// under duplicate or out-of-order delivery.
    pub async fn handle_expired_key(&self, expired_key: &str) {
        if !expired_key.starts_with(SAFETY_KEY_PREFIX) {
            return;
        }

        let segments: Vec<&str> = expired_key.split(':').collect();
        if segments.len() != 4 {
            tracing::warn!(key = %expired_key, "Ignoring malformed safety key");
            return;
        }

        let user_id = segments[1];
        let job_id = segments[3];
        let tier = match Tier::from_name(segments[2]) {
            Ok(tier) => tier,
            Err(_) => {
                tracing::warn!(key = %expired_key, tier = %segments[2], "Ignoring safety key with unknown tier");
                return;
            }
        };

        let running_key = crate::admission::keys::running_jobs_key(user_id, tier);
        match self.store.set_remove(&running_key, job_id).await {
            Ok(()) => {
                metrics::record_expiry_cleanup(tier.name());
                tracing::info!(
                    user_id = %user_id,
                    tier = %tier,
                    job_id = %job_id,
                    "Cleaned stale job after safety key expiry"
                );
            }
            Err(e) => {
                // The sweeper will catch it on the next pass
                tracing::warn!(
                    key = %running_key,
                    job_id = %job_id,
                    error = %e,
                    "Failed to remove stale job, leaving for sweeper"
                );
            }
        }
    }

    /// Subscribe to key-expiry notifications and process them until the
    /// connection dies, then reconnect with backoff
    ///
    /// Requires `notify-keyspace-events` to include `Ex` on the Redis
    /// server. Runs forever; spawn it as a background task.
    pub async fn run(self: Arc<Self>, redis_url: String) {
        let retry = RetryConfig::default();
        let mut attempt: u32 = 0;

        loop {
            match self.subscribe_once(&redis_url).await {
                Ok(()) => {
                    // Subscription ended cleanly (connection closed); resubscribe
                    attempt = 0;
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    tracing::warn!(error = %e, attempt = attempt, "Expiry subscription lost");
                }
            }
            tokio::time::sleep(retry.delay_for_attempt(attempt.max(1))).await;
        }
    }

    async fn subscribe_once(&self, redis_url: &str) -> Result<(), redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.psubscribe(EXPIRY_CHANNEL_PATTERN).await?;
        tracing::info!(pattern = EXPIRY_CHANNEL_PATTERN, "Listening for key expiry events");

        let mut stream = pubsub.on_message();
        while let Some(message) = stream.next().await {
            let expired_key: String = match message.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(error = %e, "Undecodable expiry event payload");
                    continue;
                }
            };
            self.handle_expired_key(&expired_key).await;
        }
        Ok(())
    }
}

// ============================================================================
// Sweeper
// ============================================================================

/// Periodic backstop for missed expiry notifications
///
/// The interval should exceed the expected job duration so a sweep never
/// races a live job whose safety key write is still in flight.
pub struct Sweeper {
    store: DynStore,
    interval: Duration,
}

impl Sweeper {
    pub fn new(store: DynStore, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Scan all running sets once and drop members without a safety key
    ///
    /// Returns the number of members removed.
    pub async fn sweep(&self) -> StoreResult<u64> {
        let mut removed = 0u64;
        let set_keys = self.store.scan_keys(RUNNING_SET_SCAN_PATTERN).await?;

        for set_key in set_keys {
            // user:{userId}:{TIER}:jobs
            let segments: Vec<&str> = set_key.split(':').collect();
            if segments.len() != 4 {
                continue;
            }
            let (user_id, tier_name) = (segments[1], segments[2]);
            let Ok(tier) = Tier::from_name(tier_name) else {
                continue;
            };

            for job_id in self.store.set_members(&set_key).await? {
                let safety = crate::admission::keys::safety_key(user_id, tier, &job_id);
                if !self.store.exists(&safety).await? {
                    self.store.set_remove(&set_key, &job_id).await?;
                    metrics::record_sweeper_removal(tier.name());
                    removed += 1;
                    tracing::info!(
                        user_id = %user_id,
                        tier = %tier,
                        job_id = %job_id,
                        "Sweeper removed orphaned running-set member"
                    );
                }
            }
        }
        Ok(removed)
    }

    /// Sweep on the configured interval until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a fresh replica does
        // not sweep before jobs have written their safety keys.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(0) => tracing::debug!("Sweep complete, nothing to remove"),
                        Ok(removed) => tracing::info!(removed = removed, "Sweep removed orphaned members"),
                        Err(e) => tracing::warn!(error = %e, "Sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Sweeper shutting down");
                        return;
                    }
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::keys;
    use crate::store::{MemoryStore, SharedStore};

    fn listener_over(store: &Arc<MemoryStore>) -> ExpiryListener {
        ExpiryListener::new(store.clone() as DynStore)
    }

    #[tokio::test]
    async fn test_expired_safety_key_frees_slot() {
        let store = Arc::new(MemoryStore::new());
        let running = keys::running_jobs_key("u2", Tier::Large);
        store.set_add(&running, "j1").await.unwrap();

        let listener = listener_over(&store);
        listener
            .handle_expired_key(&keys::safety_key("u2", Tier::Large, "j1"))
            .await;

        assert_eq!(store.set_cardinality(&running).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_keys_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let running = keys::running_jobs_key("u", Tier::Small);
        store.set_add(&running, "j1").await.unwrap();

        let listener = listener_over(&store);
        listener.handle_expired_key("job:weirdkey").await;
        listener.handle_expired_key("job:u:BOGUS:j1").await;
        listener.handle_expired_key("session:u:SMALL:j1").await;
        listener.handle_expired_key("job:u:SMALL:j1:extra").await;

        // Nothing touched the running set
        assert_eq!(store.set_cardinality(&running).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_harmless() {
        let store = Arc::new(MemoryStore::new());
        let running = keys::running_jobs_key("u", Tier::Xl);
        store.set_add(&running, "j1").await.unwrap();

        let listener = listener_over(&store);
        let key = keys::safety_key("u", Tier::Xl, "j1");
        listener.handle_expired_key(&key).await;
        listener.handle_expired_key(&key).await;

        assert_eq!(store.set_cardinality(&running).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_removes_members_without_safety_key() {
        let store = Arc::new(MemoryStore::new());
        let running = keys::running_jobs_key("u1", Tier::Medium);
        store.set_add(&running, "live").await.unwrap();
        store.set_add(&running, "orphan").await.unwrap();
        store
            .set_with_ttl(
                &keys::safety_key("u1", Tier::Medium, "live"),
                Tier::Medium.name(),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let sweeper = Sweeper::new(store.clone() as DynStore, Duration::from_secs(600));
        let removed = sweeper.sweep().await.unwrap();

        assert_eq!(removed, 1);
        let members = store.set_members(&running).await.unwrap();
        assert_eq!(members, vec!["live".to_string()]);
    }

    #[tokio::test]
    async fn test_sweep_on_empty_store() {
        let store = Arc::new(MemoryStore::new());
        let sweeper = Sweeper::new(store as DynStore, Duration::from_secs(600));
        assert_eq!(sweeper.sweep().await.unwrap(), 0);
    }
}
