//! HTTP server for submissions and status queries
//!
//! This module provides the axum server that fronts the admission
//! controller: job submission, job status, health and metrics.

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::jobs::{JobRunner, JobStatusStore};

use api::create_router;

// ============================================================================
// Configuration
// ============================================================================

/// HTTP server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind
    pub bind_address: SocketAddr,

    /// Enable permissive CORS
    pub enable_cors: bool,

    /// Enable per-request tracing
    pub enable_request_logging: bool,
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

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Job runner handling submissions
    pub runner: Arc<JobRunner>,

    /// Job status reader
    pub status: Arc<JobStatusStore>,

    /// Server start time
    pub start_time: Instant,
}

// ============================================================================
// Server
// ============================================================================

/// Main HTTP server
pub struct ImportServer {
    config: ServerConfig,
    state: AppState,
}

impl ImportServer {
    pub fn new(config: ServerConfig, runner: Arc<JobRunner>, status: Arc<JobStatusStore>) -> Self {
        let state = AppState {
            runner,
            status,
            start_time: Instant::now(),
        };
        Self { config, state }
    }

    /// Build the router with all routes and layers
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Serve until the shutdown future resolves
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = self.build_router();
        let addr = self.config.bind_address;

        tracing::info!(addr = %addr, "Starting import server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await?;

        tracing::info!("Import server shutdown complete");
        Ok(())
    }
}
