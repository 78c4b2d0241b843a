//! Price Feed Message Types
//!
//! Wire format types for the streaming price feed. Every frame is a JSON
//! object (or an array of objects) carrying a `type` discriminator.
//!
//! # Inbound
//!
//! - `quote`: a full price update for one symbol
//! - `trade`: a batch of last-sale prints (Finnhub style)
//! - `ping`: keep-alive
//! - `error`: server-side error text
//!
//! # Outbound
//!
//! - `subscribe` / `unsubscribe` naming a single symbol

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::ports::FeedCommand;

// =============================================================================
// Inbound
// =============================================================================

/// Message type discriminators understood by the codec.
pub mod kind {
    /// Price update.
    pub const QUOTE: &str = "quote";
    /// Trade batch.
    pub const TRADE: &str = "trade";
    /// Keep-alive.
    pub const PING: &str = "ping";
    /// Server error.
    pub const ERROR: &str = "error";
}

/// Price update for one symbol.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "quote", "symbol": "AAPL", "currentPrice": 189.52,
///  "change": 1.23, "changePercent": 0.65, "timestamp": "2025-03-01T14:30:00"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdateMessage {
    /// Ticker symbol.
    pub symbol: String,
    /// Last price. `price` is accepted as an alias.
    #[serde(alias = "price")]
    pub current_price: Decimal,
    /// Change since previous close.
    #[serde(default)]
    pub change: Option<Decimal>,
    /// Percentage change since previous close.
    #[serde(default)]
    pub change_percent: Option<Decimal>,
    /// Best bid.
    #[serde(default)]
    pub bid: Option<Decimal>,
    /// Best ask.
    #[serde(default)]
    pub ask: Option<Decimal>,
    /// Server timestamp; RFC 3339 or zone-less ISO.
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Batch of trades.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "trade", "data": [{"s": "AAPL", "p": 189.5, "t": 1740839400000, "v": 100}]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TradeBatchMessage {
    /// Trades in the batch.
    #[serde(default)]
    pub data: Vec<TradeMessage>,
}

/// Single trade print.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TradeMessage {
    /// Ticker symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Trade price.
    #[serde(rename = "p")]
    pub price: Decimal,
    /// Epoch milliseconds.
    #[serde(rename = "t")]
    pub timestamp_ms: i64,
    /// Trade volume.
    #[serde(rename = "v", default)]
    pub volume: Option<Decimal>,
}

/// Error reported by the feed server.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "error", "msg": "Invalid symbol"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerErrorMessage {
    /// Error text.
    #[serde(alias = "message")]
    pub msg: String,
}

// =============================================================================
// Outbound
// =============================================================================

/// Action of a subscription request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    /// Start streaming.
    Subscribe,
    /// Stop streaming.
    Unsubscribe,
}

/// Subscription request for one symbol.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "subscribe", "symbol": "AAPL"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    /// Subscribe or unsubscribe.
    #[serde(rename = "type")]
    pub action: SubscriptionAction,
    /// Symbol.
    pub symbol: String,
}

impl From<&FeedCommand> for SubscriptionRequest {
    fn from(command: &FeedCommand) -> Self {
        let action = match command {
            FeedCommand::Subscribe(_) => SubscriptionAction::Subscribe,
            FeedCommand::Unsubscribe(_) => SubscriptionAction::Unsubscribe,
        };
        Self {
            action,
            symbol: command.symbol().to_string(),
        }
    }
}
