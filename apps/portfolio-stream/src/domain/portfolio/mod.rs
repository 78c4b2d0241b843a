//! Portfolio Types
//!
//! Holdings, per-symbol stock metadata, and the account summary as they
//! arrive from the portfolio and account services. Everything derived from
//! them lives in [`analysis`] and [`events`].

pub mod analysis;
pub mod events;

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::streaming::Symbol;

pub use analysis::{
    DEFAULT_EVENT_WINDOW, DividendProjection, HoldingIssue, HoldingView, PortfolioAggregator,
    PortfolioAnalysis, PriceStatus,
};
pub use events::{EventKind, PortfolioEvent};

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of the dashboard's user in the portfolio service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HoldingId(pub i64);

impl fmt::Display for HoldingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Stock Profile
// =============================================================================

/// Per-symbol metadata attached to a holding by the portfolio service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockProfile {
    /// Company display name.
    pub company_name: Option<String>,
    /// Last price the backend recorded, used when no live quote exists.
    pub reference_price: Option<Decimal>,
    /// Dividend yield in percent.
    pub dividend_yield: Option<Decimal>,
    /// Annual dividend per share.
    pub annual_dividend: Option<Decimal>,
    /// Next ex-dividend or payment date.
    pub next_dividend_date: Option<DateTime<Utc>>,
    /// Next earnings report date.
    pub next_earnings_date: Option<DateTime<Utc>>,
}

// =============================================================================
// Holding
// =============================================================================

/// One portfolio position.
///
/// Holdings are replaced rather than edited: buying more of a symbol
/// creates a new holding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    /// Service-assigned id.
    pub id: HoldingId,
    /// Held instrument.
    pub symbol: Symbol,
    /// Number of shares.
    pub quantity: Decimal,
    /// Average cost per share.
    pub average_buy_price: Decimal,
    /// Total cost basis.
    pub total_invested: Decimal,
    /// Metadata for valuation and events.
    #[serde(default)]
    pub profile: StockProfile,
}

impl Holding {
    /// Create a holding whose cost basis is `quantity × average_buy_price`.
    #[must_use]
    pub fn new(id: HoldingId, symbol: Symbol, quantity: Decimal, average_buy_price: Decimal) -> Self {
        Self {
            id,
            symbol,
            quantity,
            average_buy_price,
            total_invested: quantity.saturating_mul(average_buy_price),
            profile: StockProfile::default(),
        }
    }

    /// Override the cost basis.
    #[must_use]
    pub const fn with_total_invested(mut self, total_invested: Decimal) -> Self {
        self.total_invested = total_invested;
        self
    }

    /// Attach stock metadata.
    #[must_use]
    pub fn with_profile(mut self, profile: StockProfile) -> Self {
        self.profile = profile;
        self
    }
}

/// Request to open a new position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHolding {
    /// Instrument to buy.
    pub symbol: Symbol,
    /// Number of shares.
    pub quantity: Decimal,
    /// Price paid per share.
    pub buy_price: Decimal,
}

// =============================================================================
// Account Summary
// =============================================================================

/// Account-level figures computed by the backend; displayed as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    /// Market value of the account.
    pub current_value: Decimal,
    /// Net deposits.
    pub total_deposits: Decimal,
    /// Lifetime profit or loss.
    pub total_profit_loss: Decimal,
    /// Lifetime profit or loss in percent.
    pub total_profit_loss_percentage: Decimal,
    /// Profit or loss since the previous close.
    pub daily_profit_loss: Decimal,
    /// Daily profit or loss in percent.
    pub daily_profit_loss_percentage: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn new_holding_derives_cost_basis() {
        let holding = Holding::new(HoldingId(1), Symbol::new("AAPL"), dec!(10), dec!(150.25));
        assert_eq!(holding.total_invested, dec!(1502.50));
    }

    #[test]
    fn holding_serializes_camel_case() {
        let holding = Holding::new(HoldingId(3), Symbol::new("KO"), dec!(2), dec!(60));
        let json = serde_json::to_value(&holding).unwrap();

        assert_eq!(json["id"], 3);
        assert_eq!(json["symbol"], "KO");
        assert!(json.get("averageBuyPrice").is_some());
        assert!(json.get("totalInvested").is_some());
    }
}
