//! Configuration management for the floodgate service
//!
//! This module handles loading and validating configuration from environment
//! variables and an optional TOML file. File values win over defaults; the
//! environment wins over both.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::admission::{Tier, TierTable};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Shared store (Redis) configuration
    pub store: StoreConfig,

    /// Admission controller configuration
    pub admission: AdmissionConfig,

    /// Job execution configuration
    pub jobs: JobsConfig,

    /// Import source and persistence configuration
    pub importer: ImporterConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the HTTP server
    pub bind_address: SocketAddr,

    /// Enable permissive CORS
    pub enable_cors: bool,

    /// Enable per-request tracing
    pub enable_request_logging: bool,
}

/// Shared store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis URL
    pub redis_url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Per-call I/O timeout in milliseconds
    pub call_timeout_ms: u64,
}

/// Admission controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Max job lifetime; bounds how long a crashed reservation can linger
    pub safety_key_ttl_secs: u64,

    /// Retention for job status records
    pub status_ttl_secs: u64,

    /// Interval between sweeper passes (0 disables the sweeper)
    pub sweep_interval_secs: u64,

    /// Tier overrides; omitted tiers keep their defaults
    pub tiers: Vec<TierOverride>,
}

/// Override for a single tier's numbers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierOverride {
    /// Tier name (SMALL, MEDIUM, LARGE, XL)
    pub tier: String,

    /// Upper bound on requested users; ignored for XL (always unbounded)
    pub max_count: Option<u64>,

    pub max_concurrent: Option<u32>,

    pub cooldown_seconds: Option<u64>,
}

/// Job execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Max jobs running in parallel on this replica
    pub worker_pool_size: usize,

    /// Batches between job status progress updates
    pub progress_interval: u32,
}

/// Import source and persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImporterConfig {
    /// Base URL of the synthetic user source API
    pub api_url: String,

    /// Source request timeout in seconds
    pub request_timeout_secs: u64,

    /// Users fetched and inserted per batch
    pub batch_size: u32,

    /// PostgreSQL connection string
    pub postgres_url: String,

    /// PostgreSQL pool size
    pub postgres_pool_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            enable_cors: false,
            enable_request_logging: true,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: String::from("redis://localhost:6379"),
            pool_size: 10,
            call_timeout_ms: 1_000,
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            safety_key_ttl_secs: 900,
            status_ttl_secs: 86_400,
            sweep_interval_secs: 1_800,
            tiers: Vec::new(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 8,
            progress_interval: 1,
        }
    }
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            api_url: String::from("https://randomuser.me"),
            request_timeout_secs: 30,
            batch_size: 500,
            postgres_url: String::from("postgresql://localhost/floodgate"),
            postgres_pool_size: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            admission: AdmissionConfig::default(),
            jobs: JobsConfig::default(),
            importer: ImporterConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables over defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply the environment
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(addr) = env_parsed("FLOODGATE_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }
        if let Ok(url) = std::env::var("FLOODGATE_REDIS_URL").or_else(|_| std::env::var("REDIS_URL"))
        {
            self.store.redis_url = url;
        }
        if let Some(ms) = env_parsed("FLOODGATE_STORE_CALL_TIMEOUT_MS") {
            self.store.call_timeout_ms = ms;
        }
        if let Some(secs) = env_parsed("FLOODGATE_SAFETY_KEY_TTL_SECS") {
            self.admission.safety_key_ttl_secs = secs;
        }
        if let Some(secs) = env_parsed("FLOODGATE_SWEEP_INTERVAL_SECS") {
            self.admission.sweep_interval_secs = secs;
        }
        if let Some(size) = env_parsed("FLOODGATE_WORKER_POOL_SIZE") {
            self.jobs.worker_pool_size = size;
        }
        if let Some(interval) = env_parsed("FLOODGATE_PROGRESS_INTERVAL") {
            self.jobs.progress_interval = interval;
        }
        if let Ok(url) = std::env::var("FLOODGATE_SOURCE_API_URL") {
            self.importer.api_url = url;
        }
        if let Ok(url) = std::env::var("DATABASE_URL").or_else(|_| std::env::var("POSTGRES_URL")) {
            self.importer.postgres_url = url;
        }
        if let Ok(level) = std::env::var("FLOODGATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("FLOODGATE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.store.call_timeout_ms == 0 {
            anyhow::bail!("store call_timeout_ms must be greater than 0");
        }
        if self.admission.safety_key_ttl_secs == 0 {
            anyhow::bail!("safety_key_ttl_secs must be greater than 0");
        }
        if self.jobs.worker_pool_size == 0 {
            anyhow::bail!("worker_pool_size must be greater than 0");
        }
        if self.importer.batch_size == 0 {
            anyhow::bail!("importer batch_size must be greater than 0");
        }
        // Surface tier-table problems at startup rather than first request
        self.tier_table()?;
        Ok(())
    }

    /// Build the tier table with any configured overrides applied
    pub fn tier_table(&self) -> Result<TierTable> {
        let defaults = TierTable::default();
        let mut limits = [
            *defaults.limits(Tier::Small),
            *defaults.limits(Tier::Medium),
            *defaults.limits(Tier::Large),
            *defaults.limits(Tier::Xl),
        ];

        for over in &self.admission.tiers {
            let tier = Tier::from_name(&over.tier)
                .with_context(|| format!("unknown tier in config: {}", over.tier))?;
            let slot = &mut limits[tier as usize];
            if let Some(max_count) = over.max_count {
                if tier != Tier::Xl {
                    slot.max_count = max_count;
                }
            }
            if let Some(max_concurrent) = over.max_concurrent {
                slot.max_concurrent = max_concurrent;
            }
            if let Some(cooldown_seconds) = over.cooldown_seconds {
                slot.cooldown_seconds = cooldown_seconds;
            }
        }

        TierTable::new(limits).context("invalid tier configuration")
    }

    /// Per-call store timeout as a Duration
    #[must_use]
    pub fn store_call_timeout(&self) -> Duration {
        Duration::from_millis(self.store.call_timeout_ms)
    }

    /// Safety key TTL as a Duration
    #[must_use]
    pub fn safety_key_ttl(&self) -> Duration {
        Duration::from_secs(self.admission.safety_key_ttl_secs)
    }

    /// Status record retention as a Duration
    #[must_use]
    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(self.admission.status_ttl_secs)
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_worker_pool() {
        let mut config = Config::default();
        config.jobs.worker_pool_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tier_override() {
        let mut config = Config::default();
        config.admission.tiers.push(TierOverride {
            tier: "SMALL".to_string(),
            max_count: Some(200),
            max_concurrent: Some(4),
            cooldown_seconds: None,
        });

        let table = config.tier_table().unwrap();
        assert_eq!(table.classify(150), Tier::Small);
        assert_eq!(table.max_concurrent(Tier::Small), 4);
        assert_eq!(table.cooldown_seconds(Tier::Small), 5);
    }

    #[test]
    fn test_unknown_tier_override_fails() {
        let mut config = Config::default();
        config.admission.tiers.push(TierOverride {
            tier: "HUGE".to_string(),
            max_count: None,
            max_concurrent: Some(2),
            cooldown_seconds: None,
        });
        assert!(config.tier_table().is_err());
    }

    #[test]
    fn test_timeout_conversions() {
        let config = Config::default();
        assert_eq!(config.store_call_timeout(), Duration::from_millis(1_000));
        assert_eq!(config.safety_key_ttl(), Duration::from_secs(900));
    }

    #[test]
    fn test_parse_toml_fragment() {
        let toml = r#"
            [store]
            redis_url = "redis://redis.internal:6379"

            [[admission.tiers]]
            tier = "XL"
            cooldown_seconds = 60
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.store.redis_url, "redis://redis.internal:6379");

        let table = config.tier_table().unwrap();
        assert_eq!(table.cooldown_seconds(Tier::Xl), 60);
    }
}
