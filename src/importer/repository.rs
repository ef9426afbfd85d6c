//! PostgreSQL persistence for imported users
//!
//! Inserts arrive in batches; each batch is one multi-row statement inside
//! its own transaction, so a workload processing thousands of users never
//! round-trips per row and a failed batch rolls back cleanly.

use anyhow::{Context, Result};
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

use super::client::ImportedUser;

/// Columns written per user; keeps the placeholder math in one place
const INSERT_COLUMNS: usize = 8;

// ============================================================================
// Configuration
// ============================================================================

/// Repository settings
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// PostgreSQL connection URL
    pub database_url: String,

    /// Connection pool size
    pub pool_size: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/floodgate".to_string(),
            pool_size: 10,
        }
    }
}

// ============================================================================
// Repository
// ============================================================================

/// Pooled PostgreSQL repository for imported users
pub struct UserRepository {
    pool: Pool,
}

impl UserRepository {
    /// Connect and verify the database is reachable
    pub async fn connect(config: &RepositoryConfig) -> Result<Self> {
        let mut pool_config = PoolConfig::new();
        pool_config.url = Some(config.database_url.clone());
        pool_config.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .context("Failed to create PostgreSQL connection pool")?;

        let client = pool
            .get()
            .await
            .context("Failed to connect to PostgreSQL")?;
        client.simple_query("SELECT 1").await?;

        tracing::info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create the imported_users table if it does not exist
    pub async fn init_schema(&self) -> Result<()> {
        let client = self.pool.get().await?;

        client
            .batch_execute(
                r#"
                CREATE TABLE IF NOT EXISTS imported_users (
                    id BIGSERIAL PRIMARY KEY,
                    external_id VARCHAR(64) NOT NULL UNIQUE,
                    first_name TEXT NOT NULL,
                    last_name TEXT NOT NULL,
                    gender VARCHAR(16) NOT NULL,
                    email TEXT NOT NULL,
                    age INT NOT NULL,
                    city TEXT NOT NULL,
                    country TEXT NOT NULL,
                    imported_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                );

                CREATE INDEX IF NOT EXISTS idx_imported_users_email
                    ON imported_users(email);

                CREATE INDEX IF NOT EXISTS idx_imported_users_age
                    ON imported_users(age);
                "#,
            )
            .await
            .context("Failed to create imported_users schema")?;

        tracing::info!("Import schema initialized");
        Ok(())
    }

    /// Insert a batch of users in a single transaction
    ///
    /// Returns the number of rows written. Users already present (same
    /// external id) are skipped, which makes re-running a failed job safe.
    pub async fn insert_batch(&self, users: &[ImportedUser]) -> Result<u64> {
        if users.is_empty() {
            return Ok(0);
        }

        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await?;

        let mut placeholders = Vec::with_capacity(users.len());
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(users.len() * INSERT_COLUMNS);

        for (row, user) in users.iter().enumerate() {
            let base = row * INSERT_COLUMNS;
            placeholders.push(format!(
                "(${}, ${}, ${}, ${}, ${}, ${}, ${}, ${})",
                base + 1,
                base + 2,
                base + 3,
                base + 4,
                base + 5,
                base + 6,
                base + 7,
                base + 8,
            ));
            params.push(&user.external_id);
            params.push(&user.first_name);
            params.push(&user.last_name);
            params.push(&user.gender);
            params.push(&user.email);
            params.push(&user.age);
            params.push(&user.city);
            params.push(&user.country);
        }

        let statement = format!(
            r#"
            INSERT INTO imported_users
                (external_id, first_name, last_name, gender, email, age, city, country)
            VALUES {}
            ON CONFLICT (external_id) DO NOTHING
            "#,
            placeholders.join(", ")
        );

        let written = transaction
            .execute(&statement, &params)
            .await
            .context("Failed to insert user batch")?;
        transaction.commit().await.context("Failed to commit user batch")?;

        tracing::debug!(batch = users.len(), written = written, "Inserted user batch");
        Ok(written)
    }

    /// Number of imported users currently stored
    pub async fn count(&self) -> Result<i64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one("SELECT COUNT(*) FROM imported_users", &[])
            .await?;
        Ok(row.get(0))
    }
}

// ============================================================================
// Tests
// ============================================================================
