//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `PriceStore`: latest quote per symbol, single writer
//! - `SubscriptionMultiplexer`: shares the price feed across consumers
//! - `DashboardOrchestrator`: loads data and republishes the analysis

pub mod dashboard;
pub mod multiplexer;
pub mod price_store;

pub use dashboard::{
    DashboardError, DashboardOrchestrator, DashboardServices, DashboardState, DashboardView,
};
pub use multiplexer::{
    FnHandler, HandlerError, MultiplexerError, QuoteHandler, SubscriptionMultiplexer, handler_fn,
};
pub use price_store::{PriceStore, PriceWriter};
