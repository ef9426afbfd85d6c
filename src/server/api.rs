//! REST API handlers
//!
//! Routes, request validation and the translation of admission outcomes
//! into HTTP responses. Rejections surface as structured 429 bodies;
//! store failures as 503; invalid input never reaches the controller.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::jobs::{JobStatusRecord, SubmitError};

use super::AppState;

/// Header carrying the caller's opaque user id
const USER_ID_HEADER: &str = "X-User-Id";

// ============================================================================
// Response Types
// ============================================================================

/// Body returned when a submission is accepted
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: String,
    pub message: String,
}

/// Structured error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub timestamp: DateTime<Utc>,
    pub status: u16,
    pub error: String,
    pub message: String,
    #[serde(rename = "totalSeconds", skip_serializing_if = "Option::is_none")]
    pub total_seconds: Option<u64>,
    #[serde(rename = "remainingSeconds", skip_serializing_if = "Option::is_none")]
    pub remaining_seconds: Option<u64>,
}

impl ErrorResponse {
    fn new(status: StatusCode, error: &str, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            status: status.as_u16(),
            error: error.to_string(),
            message: message.into(),
            total_seconds: None,
            remaining_seconds: None,
        }
    }
}

/// Job status body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: String,
    pub requested_count: u64,
    pub processed_count: u64,
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    pub message: String,
}

impl From<JobStatusRecord> for JobStatusResponse {
    fn from(record: JobStatusRecord) -> Self {
        Self {
            progress: record.progress_percent(),
            job_id: record.job_id,
            status: record.status.to_string(),
            requested_count: record.requested_count,
            processed_count: record.processed_count,
            started_at: record.started_at,
            message: record.message,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/users/import/async", post(submit_import))
        .route("/jobs/:job_id", get(get_job_status))
        .route("/api/health", get(health_check))
        .route("/metrics", get(export_metrics))
        .with_state(state)
}

// ============================================================================
// Submission Handler
// ============================================================================

#[derive(Debug, Deserialize)]
struct SubmitParams {
    count: Option<String>,
}

async fn submit_import(
    State(state): State<AppState>,
    Query(params): Query<SubmitParams>,
    headers: HeaderMap,
) -> axum::response::Response {
    let user_id = match validate_user_id(&headers) {
        Ok(user_id) => user_id,
        Err(message) => return bad_request(message),
    };

    let count = match validate_count(params.count.as_deref()) {
        Ok(count) => count,
        Err(message) => return bad_request(message),
    };

    match state.runner.submit(&user_id, count).await {
        Ok(ticket) => (
            StatusCode::ACCEPTED,
            Json(SubmitResponse {
                job_id: ticket.job_id,
                status: ticket.status.to_string(),
                message: format!("Import of {count} users accepted ({} tier)", ticket.tier),
            }),
        )
            .into_response(),

        Err(e @ SubmitError::TooManyRequests { .. }) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse::new(
                StatusCode::TOO_MANY_REQUESTS,
                "Too Many Requests",
                e.to_string(),
            )),
        )
            .into_response(),

        Err(SubmitError::CooldownActive {
            total_seconds,
            remaining_seconds,
            ..
        }) => {
            let mut body = ErrorResponse::new(
                StatusCode::TOO_MANY_REQUESTS,
                "Too Many Requests",
                "User is in cooldown period",
            );
            body.total_seconds = Some(total_seconds);
            body.remaining_seconds = Some(remaining_seconds);
            (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
        }

        Err(SubmitError::Store(e)) => {
            tracing::error!(user_id = %user_id, error = %e, "Submission failed on store error");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service Unavailable",
                    "Shared store unavailable, try again later",
                )),
            )
                .into_response()
        }
    }
}

fn bad_request(message: String) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new(
            StatusCode::BAD_REQUEST,
            "Bad Request",
            message,
        )),
    )
        .into_response()
}

/// User ids are opaque text but must be usable inside colon-separated keys
fn validate_user_id(headers: &HeaderMap) -> Result<String, String> {
    let Some(raw) = headers.get(USER_ID_HEADER) else {
        return Err(format!("missing {USER_ID_HEADER} header"));
    };
    let Ok(user_id) = raw.to_str() else {
        return Err(format!("{USER_ID_HEADER} header is not valid text"));
    };
    if user_id.is_empty() {
        return Err(format!("{USER_ID_HEADER} header is empty"));
    }
    if user_id.contains(':') || user_id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err("user id must not contain colons, whitespace or control characters".to_string());
    }
    Ok(user_id.to_string())
}

fn validate_count(raw: Option<&str>) -> Result<u64, String> {
    let Some(raw) = raw else {
        return Err("missing count query parameter".to_string());
    };
    match raw.parse::<u64>() {
        Ok(count) if count > 0 => Ok(count),
        Ok(_) => Err("count must be a positive integer".to_string()),
        Err(_) => Err(format!("invalid count: {raw}")),
    }
}

// ============================================================================
// Status Handler
// ============================================================================

async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    match state.status.get(&job_id).await {
        Ok(Some(record)) => {
            (StatusCode::OK, Json(JobStatusResponse::from(record))).into_response()
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                StatusCode::NOT_FOUND,
                "Not Found",
                format!("No job with id {job_id}"),
            )),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Status lookup failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service Unavailable",
                    "Shared store unavailable, try again later",
                )),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Health & Metrics Handlers
// ============================================================================

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn export_metrics() -> axum::response::Response {
    match crate::metrics::encode_metrics() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, String::new()).into_response()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
