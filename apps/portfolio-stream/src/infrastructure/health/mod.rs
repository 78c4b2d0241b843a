//! Health Check and Status Endpoint
//!
//! HTTP endpoint for health checks, feed status, Prometheus metrics and the
//! live portfolio view.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (feed connected, dashboard loaded)
//! - `GET /metrics` - Prometheus metrics in text format
//! - `GET /portfolio` - Current dashboard state as JSON

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::application::services::{DashboardState, SubscriptionMultiplexer};
use crate::domain::streaming::ConnectionState;
use crate::domain::subscription::SubscriptionStats;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Price feed status.
    pub feed: FeedInfo,
    /// Subscription statistics.
    pub subscriptions: SubscriptionStats,
    /// Dashboard phase: "loading", "ready" or "failed".
    pub dashboard: &'static str,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Feed connected and dashboard loaded.
    Healthy,
    /// Serving, but the feed is down or the dashboard is still loading.
    Degraded,
    /// The dashboard failed to load.
    Unhealthy,
}

/// Feed connection status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Connection state.
    pub state: ConnectionState,
    /// Whether the feed is connected.
    pub connected: bool,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    feed: watch::Receiver<ConnectionState>,
    dashboard: watch::Receiver<DashboardState>,
    multiplexer: Arc<SubscriptionMultiplexer>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        feed: watch::Receiver<ConnectionState>,
        dashboard: watch::Receiver<DashboardState>,
        multiplexer: Arc<SubscriptionMultiplexer>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            feed,
            dashboard,
            multiplexer,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Routes served by the health server.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/portfolio", get(portfolio_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let is_ready = state.feed.borrow().is_connected() && state.dashboard.borrow().is_ready();

    if is_ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

async fn portfolio_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let dashboard = state.dashboard.borrow().clone();
    let status_code = match dashboard {
        DashboardState::Ready(_) => StatusCode::OK,
        DashboardState::Loading => StatusCode::ACCEPTED,
        DashboardState::Failed { .. } => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(dashboard))
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let feed_state = *state.feed.borrow();
    let feed = FeedInfo {
        state: feed_state,
        connected: feed_state.is_connected(),
    };
    let dashboard = state.dashboard.borrow().phase();

    HealthResponse {
        status: determine_health_status(&feed, dashboard),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed,
        subscriptions: state.multiplexer.stats(),
        dashboard,
    }
}

fn determine_health_status(feed: &FeedInfo, dashboard: &str) -> HealthStatus {
    match (feed.connected, dashboard) {
        (_, "failed") => HealthStatus::Unhealthy,
        (true, "ready") => HealthStatus::Healthy,
        _ => HealthStatus::Degraded,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
