//! Redis-backed store implementation
//!
//! Production implementation of [`SharedStore`] over a deadpool-redis
//! connection pool. Every call is bounded by the configured per-call
//! timeout; a timeout or pool failure surfaces as [`StoreError`] and is
//! never retried here.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;

use super::{ReservationVerdict, SharedStore, StoreError, StoreResult};

/// Server-side check-and-reserve: count the running set, compare against
/// the limit, insert the member only when under it. Runs as one
/// uninterruptible operation inside Redis.
const RESERVE_SLOT_SCRIPT: &str = r#"
local current = redis.call('SCARD', KEYS[1])
if current >= tonumber(ARGV[1]) then
  return 0
end
redis.call('SADD', KEYS[1], ARGV[2])
return 1
"#;

// ============================================================================
// Configuration
// ============================================================================

/// Redis connection settings
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis URL (e.g. redis://localhost:6379)
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Timeout applied to every individual store call
    pub call_timeout: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            call_timeout: Duration::from_secs(1),
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// Redis client implementing the [`SharedStore`] contract
pub struct RedisStore {
    pool: Pool,
    call_timeout: Duration,
    reserve_script: redis::Script,
}

impl RedisStore {
    /// Connect to Redis and verify the connection with a PING
    pub async fn connect(config: &RedisStoreConfig) -> StoreResult<Self> {
        let pool_config = PoolConfig::from_url(&config.url);
        let pool = pool_config
            .builder()
            .map_err(|e| StoreError::Unavailable(format!("pool builder: {e}")))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StoreError::Unavailable(format!("pool build: {e}")))?;

        let store = Self {
            pool,
            call_timeout: config.call_timeout,
            reserve_script: redis::Script::new(RESERVE_SLOT_SCRIPT),
        };

        let mut conn = store.conn().await?;
        let _: String = store
            .bounded(redis::cmd("PING").query_async(&mut conn))
            .await?;

        tracing::info!(url = %config.url, "Connected to Redis");
        Ok(store)
    }

    async fn conn(&self) -> StoreResult<deadpool_redis::Connection> {
        match tokio::time::timeout(self.call_timeout, self.pool.get()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(StoreError::Unavailable(e.to_string())),
            Err(_) => Err(StoreError::Timeout(self.call_timeout)),
        }
    }

    /// Bound a single Redis call by the per-call timeout
    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = redis::RedisResult<T>>,
    ) -> StoreResult<T> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StoreError::Unavailable(e.to_string())),
            Err(_) => Err(StoreError::Timeout(self.call_timeout)),
        }
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        self.bounded(conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()))
            .await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        self.bounded(conn.exists(key)).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        self.bounded(conn.get(key)).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        self.bounded(conn.del::<_, ()>(key)).await
    }

    async fn ttl_seconds(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        // TTL returns -1 (no expiry) or -2 (absent); both collapse to 0
        let ttl: i64 = self.bounded(conn.ttl(key)).await?;
        Ok(ttl.max(0) as u64)
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        self.bounded(conn.sadd::<_, _, ()>(key, member)).await
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        self.bounded(conn.srem::<_, _, ()>(key, member)).await
    }

    async fn set_cardinality(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        self.bounded(conn.scard(key)).await
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn().await?;
        self.bounded(conn.smembers(key)).await
    }

    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let pattern = pattern.to_string();
        self.bounded(async move {
            let mut keys = Vec::new();
            let mut iter: redis::AsyncIter<'_, String> = conn.scan_match(&pattern).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            Ok(keys)
        })
        .await
    }

    async fn reserve_slot(
        &self,
        set_key: &str,
        limit: u32,
        member: &str,
    ) -> StoreResult<ReservationVerdict> {
        let mut conn = self.conn().await?;
        let allowed: i64 = self
            .bounded(
                self.reserve_script
                    .key(set_key)
                    .arg(limit)
                    .arg(member)
                    .invoke_async(&mut conn),
            )
            .await?;
        Ok(if allowed == 1 {
            ReservationVerdict::Allowed
        } else {
            ReservationVerdict::Rejected
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "Requires running Redis"]
    async fn test_connect_and_ping() {
        let store = RedisStore::connect(&RedisStoreConfig::default()).await;
        assert!(store.is_ok());
    }

    #[tokio::test]
    #[ignore = "Requires running Redis"]
    async fn test_reserve_slot_round_trip() {
        let store = RedisStore::connect(&RedisStoreConfig::default())
            .await
            .unwrap();
        let key = "floodgate-test:reserve";
        store.delete(key).await.unwrap();

        assert_eq!(
            store.reserve_slot(key, 1, "j1").await.unwrap(),
            ReservationVerdict::Allowed
        );
        assert_eq!(
            store.reserve_slot(key, 1, "j2").await.unwrap(),
            ReservationVerdict::Rejected
        );
        assert_eq!(store.set_cardinality(key).await.unwrap(), 1);

        store.delete(key).await.unwrap();
    }
}
