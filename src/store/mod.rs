//! Shared key/value store client
//!
//! All admission state lives in a store shared by every service replica.
//! This module defines the thin contract business logic speaks
//! ([`SharedStore`]), the Redis implementation used in production
//! ([`redis::RedisStore`]) and an in-process implementation used by tests
//! and single-node runs ([`memory::MemoryStore`]).
//!
//! The client surfaces every failure to the caller and never retries;
//! callers decide whether an operation is critical (admission) or
//! best-effort cleanup (release paths, where the expiry listener is the
//! backstop).

pub mod expiry;
pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::expiry::{ExpiryListener, Sweeper};
pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared handle to any store implementation
pub type DynStore = Arc<dyn SharedStore>;

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced by the shared store client
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store is unreachable or refused the operation
    #[error("shared store unavailable: {0}")]
    Unavailable(String),

    /// A single store call exceeded the configured timeout
    #[error("shared store call timed out after {0:?}")]
    Timeout(Duration),
}

// ============================================================================
// Reservation verdict
// ============================================================================

/// Outcome of the atomic check-and-reserve operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationVerdict {
    /// The member was inserted; the caller holds a slot
    Allowed,
    /// The set was already at the limit; nothing was inserted
    Rejected,
}

// ============================================================================
// SharedStore contract
// ============================================================================

/// Thin contract over the external key/value store
///
/// `delete`, `set_add` and `set_remove` are idempotent. `set_cardinality`
/// is O(1) (SCARD in Redis) and is never implemented by pattern-scanning
/// keys. `set_members` and `scan_keys` exist only for the sweeper.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Overwrite `key` with `value` and attach a TTL
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Whether `key` currently exists
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Read the value stored at `key`
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Delete `key`; absent keys are not an error
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Remaining TTL in whole seconds, or 0 if absent or without expiry
    async fn ttl_seconds(&self, key: &str) -> StoreResult<u64>;

    /// Add `member` to the set at `key`
    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()>;

    /// Remove `member` from the set at `key`
    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()>;

    /// Current cardinality of the set at `key` (0 when absent)
    async fn set_cardinality(&self, key: &str) -> StoreResult<u64>;

    /// All members of the set at `key`
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Keys matching a glob-style pattern (cursor-based, never KEYS)
    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Atomically count the set, compare against `limit` and insert
    /// `member` only if the count is below the limit
    ///
    /// The check and the insert execute as one uninterruptible operation
    /// inside the store; this is what serializes concurrent admissions
    /// across replicas.
    async fn reserve_slot(
        &self,
        set_key: &str,
        limit: u32,
        member: &str,
    ) -> StoreResult<ReservationVerdict>;
}
