//! Configuration Module
//!
//! Environment-driven configuration for the portfolio stream service.

mod settings;

pub use settings::{
    BackendSettings, ConfigError, DashboardSettings, FeedSettings, ServerSettings, ServiceConfig,
};
