//! Domain Layer - Core portfolio and streaming types.
//!
//! This layer contains the core domain types for live prices and portfolio
//! valuation with no I/O. All types here are pure Rust with
//! serialization support.

/// Symbols, quotes, and price snapshots.
pub mod streaming;

/// Consumer-to-symbol subscription tracking.
pub mod subscription;

/// Holdings, account summary, and portfolio analysis.
pub mod portfolio;
