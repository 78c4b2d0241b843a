#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Portfolio Stream - Live Portfolio Valuation
//!
//! Keeps one streaming price feed connection, shares it between every
//! consumer that needs a symbol, and turns holdings plus live prices into a
//! continuously updated portfolio analysis.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and calculations
//!   - `streaming`: symbols, quotes, price snapshots
//!   - `subscription`: consumer-per-symbol registry
//!   - `portfolio`: holdings, account figures, analysis, events
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: feed transport, frame decoder, backend services
//!   - `services`: price store, subscription multiplexer, dashboard
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: WebSocket client and JSON codec
//!   - `backend`: REST client for holdings, account and quotes
//!   - `config`: environment configuration
//!   - `health`: status HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                    ┌──────────────┐     ┌─────────────┐
//! Price feed WS ────►│ Multiplexer  │────►│ PriceStore  │
//!                    └──────┬───────┘     └──────┬──────┘
//!                           │ ticks              │ snapshot
//!                           ▼                    ▼
//! Backend REST ────► Dashboard orchestrator ──► PortfolioAnalysis
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types and pure calculations.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::portfolio::{
    AccountSummary, Holding, HoldingId, HoldingView, PortfolioAggregator, PortfolioAnalysis,
    PortfolioEvent, StockProfile, UserId,
};
pub use domain::streaming::{ConnectionState, PriceSnapshot, Quote, Symbol};
pub use domain::subscription::{ConsumerId, SubscriptionHandle, SubscriptionStats};

// Application services
pub use application::services::{
    DashboardOrchestrator, DashboardServices, DashboardState, PriceStore, QuoteHandler,
    SubscriptionMultiplexer, handler_fn,
};

// Infrastructure config
pub use infrastructure::config::{
    BackendSettings, ConfigError, DashboardSettings, FeedSettings, ServerSettings, ServiceConfig,
};

// Adapters
pub use infrastructure::backend::BackendClient;
pub use infrastructure::feed::{FeedClient, FeedClientConfig, FeedCodec};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
