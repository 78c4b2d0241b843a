//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Streaming price feed client, codec and backoff.
pub mod feed;

/// REST client for the portfolio backend.
pub mod backend;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;

/// Lenient timestamp parsing.
pub mod timestamp;
