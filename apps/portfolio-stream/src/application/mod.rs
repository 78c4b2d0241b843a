//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for the price feed and backend services.
pub mod ports;

/// Price store, subscription multiplexer, and dashboard orchestration.
pub mod services;
