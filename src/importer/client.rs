//! Client for the synthetic user source API
//!
//! Pulls batches of generated users from a randomuser.me-compatible
//! endpoint. One request fetches a whole batch; the caller decides batch
//! sizes and pacing.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// Configuration
// ============================================================================

/// Source API settings
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Base URL of the user source API
    pub api_url: String,

    /// Request timeout
    pub timeout: Duration,

    /// Nationality filter passed to the API
    pub nationalities: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_url: "https://randomuser.me".to_string(),
            timeout: Duration::from_secs(30),
            nationalities: "us,ca,au,gb,in".to_string(),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors from the user source API
#[derive(Error, Debug)]
pub enum SourceError {
    /// HTTP request error
    #[error("source request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from the API
    #[error("source returned status {0}")]
    Status(u16),

    /// The API returned an empty batch
    #[error("source returned no users")]
    EmptyBatch,
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct SourceResponse {
    results: Vec<SourceRecord>,
}

#[derive(Debug, Deserialize)]
struct SourceRecord {
    gender: String,
    name: SourceName,
    email: String,
    dob: SourceDob,
    location: SourceLocation,
    login: SourceLogin,
}

#[derive(Debug, Deserialize)]
struct SourceName {
    first: String,
    last: String,
}

#[derive(Debug, Deserialize)]
struct SourceDob {
    age: i32,
}

#[derive(Debug, Deserialize)]
struct SourceLocation {
    city: String,
    country: String,
}

#[derive(Debug, Deserialize)]
struct SourceLogin {
    uuid: String,
}

/// One user as stored by the import pipeline
#[derive(Debug, Clone)]
pub struct ImportedUser {
    pub external_id: String,
    pub first_name: String,
    pub last_name: String,
    pub gender: String,
    pub email: String,
    pub age: i32,
    pub city: String,
    pub country: String,
}

impl From<SourceRecord> for ImportedUser {
    fn from(record: SourceRecord) -> Self {
        Self {
            external_id: record.login.uuid,
            first_name: record.name.first,
            last_name: record.name.last,
            gender: record.gender,
            email: record.email,
            age: record.dob.age,
            city: record.location.city,
            country: record.location.country,
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// HTTP client for the user source API
pub struct UserSourceClient {
    config: SourceConfig,
    http: Client,
}

impl UserSourceClient {
    pub fn new(config: SourceConfig) -> Result<Self, SourceError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(format!("floodgate/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, http })
    }

    /// Fetch a batch of users in one request
    pub async fn fetch_batch(&self, count: u32) -> Result<Vec<ImportedUser>, SourceError> {
        let url = format!("{}/api/", self.config.api_url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .query(&[
                ("results", count.to_string()),
                ("nat", self.config.nationalities.clone()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let body: SourceResponse = response.json().await?;
        if body.results.is_empty() {
            return Err(SourceError::EmptyBatch);
        }

        tracing::debug!(requested = count, received = body.results.len(), "Fetched user batch");
        Ok(body.results.into_iter().map(ImportedUser::from).collect())
    }
}

// ============================================================================
// Tests
// ============================================================================
