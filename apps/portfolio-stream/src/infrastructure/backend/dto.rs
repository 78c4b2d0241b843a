//! Backend REST payloads.
//!
//! JSON shapes served by the portfolio backend, converted into domain types
//! at the boundary.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::portfolio::{Holding, HoldingId, NewHolding, StockProfile, UserId};
use crate::domain::streaming::{Quote, Symbol};
use crate::infrastructure::timestamp;

/// Stock row nested in a holding.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockDto {
    /// Ticker symbol.
    pub symbol: String,
    /// Company name.
    #[serde(default)]
    pub company_name: Option<String>,
    /// Last price the backend recorded.
    #[serde(default)]
    pub current_price: Option<Decimal>,
    /// Dividend yield in percent.
    #[serde(default)]
    pub dividend_yield: Option<Decimal>,
    /// Annual dividend per share.
    #[serde(default)]
    pub annual_dividend: Option<Decimal>,
    /// Next ex-dividend date.
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub next_dividend_date: Option<DateTime<Utc>>,
    /// Next earnings date.
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub next_earnings_date: Option<DateTime<Utc>>,
}

/// Holding as returned by `GET /api/portfolio/{userId}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingDto {
    /// Holding id.
    pub id: i64,
    /// Held stock.
    pub stock: StockDto,
    /// Number of shares.
    pub quantity: Decimal,
    /// Average cost per share.
    pub average_buy_price: Decimal,
    /// Total cost basis; derived when absent.
    #[serde(default)]
    pub total_invested: Option<Decimal>,
}

impl From<HoldingDto> for Holding {
    fn from(dto: HoldingDto) -> Self {
        let stock = dto.stock;
        let holding = Self::new(
            HoldingId(dto.id),
            Symbol::new(&stock.symbol),
            dto.quantity,
            dto.average_buy_price,
        )
        .with_profile(StockProfile {
            company_name: stock.company_name,
            reference_price: stock.current_price,
            dividend_yield: stock.dividend_yield,
            annual_dividend: stock.annual_dividend,
            next_dividend_date: stock.next_dividend_date,
            next_earnings_date: stock.next_earnings_date,
        });

        match dto.total_invested {
            Some(total) => holding.with_total_invested(total),
            None => holding,
        }
    }
}

/// Body of `POST /api/portfolio`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddHoldingRequest {
    /// Owner.
    pub user_id: i64,
    /// Ticker symbol.
    pub symbol: String,
    /// Number of shares.
    pub quantity: Decimal,
    /// Price paid per share.
    pub buy_price: Decimal,
}

impl AddHoldingRequest {
    /// Build the request body for `user`.
    #[must_use]
    pub fn new(user: UserId, holding: &NewHolding) -> Self {
        Self {
            user_id: user.0,
            symbol: holding.symbol.to_string(),
            quantity: holding.quantity,
            buy_price: holding.buy_price,
        }
    }
}

/// Quote as returned by `GET /api/stocks/{symbol}/quote`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteDto {
    /// Ticker symbol.
    pub symbol: String,
    /// Last price.
    pub current_price: Decimal,
    /// Change since previous close.
    #[serde(default)]
    pub change: Option<Decimal>,
    /// Percentage change since previous close.
    #[serde(default)]
    pub change_percent: Option<Decimal>,
    /// Quote time.
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl QuoteDto {
    /// Convert into a domain quote, stamping `fallback` when no time was sent.
    #[must_use]
    pub fn into_quote(self, fallback: DateTime<Utc>) -> Quote {
        Quote::new(
            Symbol::new(&self.symbol),
            self.current_price,
            self.timestamp.unwrap_or(fallback),
        )
        .with_change(self.change, self.change_percent)
    }
}
