//! Market Data Streaming Types
//!
//! Core domain types for live prices: symbols, quotes, and the immutable
//! price snapshots the portfolio aggregator reads from.
//! These types are codec-agnostic and represent the canonical
//! internal representation of a price tick.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Symbol
// =============================================================================

/// Ticker symbol, normalised to trimmed upper case.
///
/// Used as the key across holdings, subscriptions, and quotes, so `"aapl"`
/// and `" AAPL"` refer to the same instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Create a normalised symbol.
    #[must_use]
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_uppercase())
    }

    /// Borrow the symbol text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the symbol is empty after normalisation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Quote
// =============================================================================

/// Latest traded or quoted price for a symbol.
///
/// A quote is never mutated; each tick replaces the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Instrument the price belongs to.
    pub symbol: Symbol,
    /// Last price.
    pub price: Decimal,
    /// Exchange or feed timestamp.
    pub timestamp: DateTime<Utc>,
    /// Best bid, when the feed provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid: Option<Decimal>,
    /// Best ask, when the feed provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask: Option<Decimal>,
    /// Absolute change since the previous close.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<Decimal>,
    /// Percentage change since the previous close.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_percent: Option<Decimal>,
}

impl Quote {
    /// Create a quote carrying only a price.
    #[must_use]
    pub const fn new(symbol: Symbol, price: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol,
            price,
            timestamp,
            bid: None,
            ask: None,
            change: None,
            change_percent: None,
        }
    }

    /// Attach bid/ask.
    #[must_use]
    pub const fn with_spread(mut self, bid: Option<Decimal>, ask: Option<Decimal>) -> Self {
        self.bid = bid;
        self.ask = ask;
        self
    }

    /// Attach daily change figures.
    #[must_use]
    pub const fn with_change(
        mut self,
        change: Option<Decimal>,
        change_percent: Option<Decimal>,
    ) -> Self {
        self.change = change;
        self.change_percent = change_percent;
        self
    }

    /// Mid price when both sides are present.
    #[must_use]
    pub fn mid(&self) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }
}

// =============================================================================
// Price Snapshot
// =============================================================================

/// Point-in-time view of the latest quote per symbol.
///
/// Cloning is cheap; quotes are shared behind `Arc`.
#[derive(Debug, Clone, Default)]
pub struct PriceSnapshot {
    quotes: HashMap<Symbol, Arc<Quote>>,
}

impl PriceSnapshot {
    /// Empty snapshot.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wrap an existing map.
    #[must_use]
    pub const fn from_map(quotes: HashMap<Symbol, Arc<Quote>>) -> Self {
        Self { quotes }
    }

    /// Build a snapshot from bare prices stamped with `timestamp`.
    pub fn from_prices<I, S>(prices: I, timestamp: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = (S, Decimal)>,
        S: Into<Symbol>,
    {
        let quotes = prices
            .into_iter()
            .map(|(symbol, price)| {
                let symbol = symbol.into();
                let quote = Quote::new(symbol.clone(), price, timestamp);
                (symbol, Arc::new(quote))
            })
            .collect();
        Self { quotes }
    }

    /// Quote for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &Symbol) -> Option<&Arc<Quote>> {
        self.quotes.get(symbol)
    }

    /// Price for a symbol.
    #[must_use]
    pub fn price_of(&self, symbol: &Symbol) -> Option<Decimal> {
        self.quotes.get(symbol).map(|q| q.price)
    }

    /// Number of symbols with a quote.
    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    /// Whether no quotes are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    /// Iterate over all quotes.
    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, &Arc<Quote>)> {
        self.quotes.iter()
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle of the upstream price feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and none being attempted.
    #[default]
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Socket open and accepting commands.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
}

impl ConnectionState {
    /// Whether commands can be sent.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Stable label for logs and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}
