//! Portfolio Analysis
//!
//! Turns holdings plus a price snapshot into per-holding valuations and
//! portfolio totals. The computation is pure: the same holdings, snapshot
//! and evaluation instant always give the same analysis, so callers simply
//! recompute after every holdings change or price tick.
//!
//! # Price resolution
//!
//! | Source                         | `PriceStatus` |
//! |--------------------------------|---------------|
//! | live quote in the snapshot     | `Live`        |
//! | holding's reference price      | `Reference`   |
//! | neither (valued at zero)       | `Missing`     |
//!
//! # Degraded holdings
//!
//! A holding with a negative quantity, cost basis or price, or whose
//! arithmetic overflows, is reported with a [`HoldingIssue`] and contributes
//! nothing to the totals. The rest of the portfolio is still computed.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::events::{PortfolioEvent, upcoming_events};
use super::{Holding, HoldingId};
use crate::domain::streaming::{PriceSnapshot, Symbol};

/// Number of upcoming events kept by default.
pub const DEFAULT_EVENT_WINDOW: usize = 5;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;
const MONTHS_PER_YEAR: Decimal = Decimal::from_parts(12, 0, 0, false, 0);
const DAYS_PER_YEAR: Decimal = Decimal::from_parts(365, 0, 0, false, 0);

// =============================================================================
// Types
// =============================================================================

/// Where a holding's current price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceStatus {
    /// Latest streamed or fetched quote.
    Live,
    /// Backend's last recorded price.
    Reference,
    /// No price known; valued at zero.
    Missing,
}

/// Why a holding was excluded from the totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum HoldingIssue {
    /// Quantity below zero.
    #[error("negative quantity")]
    NegativeQuantity,
    /// Cost basis below zero.
    #[error("negative cost basis")]
    NegativeCostBasis,
    /// Price below zero.
    #[error("negative price")]
    NegativePrice,
    /// A product or sum exceeded the decimal range.
    #[error("arithmetic overflow")]
    Overflow,
}

/// Valuation of one holding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingView {
    /// Holding id.
    pub id: HoldingId,
    /// Held symbol.
    pub symbol: Symbol,
    /// Company display name, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    /// Number of shares.
    pub quantity: Decimal,
    /// Average cost per share.
    pub average_buy_price: Decimal,
    /// Cost basis.
    pub total_invested: Decimal,
    /// Resolved price.
    pub current_price: Decimal,
    /// `quantity × current_price`.
    pub current_value: Decimal,
    /// `current_value − total_invested`.
    pub profit_loss: Decimal,
    /// Profit or loss relative to cost basis, in percent.
    pub profit_loss_percentage: Decimal,
    /// Dividend yield in percent.
    pub dividend_yield: Decimal,
    /// Share of the portfolio's current value, in percent.
    pub allocation_percentage: Decimal,
    /// Price source.
    pub price_status: PriceStatus,
    /// Set when the holding was excluded from the totals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<HoldingIssue>,
}

impl HoldingView {
    /// Whether the valuation is not based on a live price or was degraded.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.price_status != PriceStatus::Live || self.issue.is_some()
    }

    fn degrade(&mut self, issue: HoldingIssue) {
        self.current_value = Decimal::ZERO;
        self.profit_loss = Decimal::ZERO;
        self.profit_loss_percentage = Decimal::ZERO;
        self.dividend_yield = Decimal::ZERO;
        self.allocation_percentage = Decimal::ZERO;
        self.issue = Some(issue);
    }
}

/// Projected dividend income at the current yield.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DividendProjection {
    /// Per year.
    pub annual: Decimal,
    /// Per month.
    pub monthly: Decimal,
    /// Per day.
    pub daily: Decimal,
}

/// Derived view over the whole portfolio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioAnalysis {
    /// Per-holding valuations, in input order.
    pub holdings: Vec<HoldingView>,
    /// Sum of current values.
    pub total_current_value: Decimal,
    /// Sum of cost bases.
    pub total_invested: Decimal,
    /// Sum of profit or loss.
    pub total_profit_loss: Decimal,
    /// Total profit or loss relative to total cost basis, in percent.
    pub total_profit_loss_percentage: Decimal,
    /// Value-weighted dividend yield, in percent.
    pub average_dividend_yield: Decimal,
    /// Projected income.
    pub dividends: DividendProjection,
    /// Nearest upcoming events.
    pub upcoming_events: Vec<PortfolioEvent>,
    /// Instant used to filter events.
    pub computed_at: DateTime<Utc>,
}

impl PortfolioAnalysis {
    /// Analysis of an empty portfolio.
    #[must_use]
    pub const fn empty(computed_at: DateTime<Utc>) -> Self {
        Self {
            holdings: Vec::new(),
            total_current_value: Decimal::ZERO,
            total_invested: Decimal::ZERO,
            total_profit_loss: Decimal::ZERO,
            total_profit_loss_percentage: Decimal::ZERO,
            average_dividend_yield: Decimal::ZERO,
            dividends: DividendProjection {
                annual: Decimal::ZERO,
                monthly: Decimal::ZERO,
                daily: Decimal::ZERO,
            },
            upcoming_events: Vec::new(),
            computed_at,
        }
    }

    /// Number of holdings without a live price or with an issue.
    #[must_use]
    pub fn stale_count(&self) -> usize {
        self.holdings.iter().filter(|h| h.is_stale()).count()
    }
}

// =============================================================================
// Aggregator
// =============================================================================

/// Computes [`PortfolioAnalysis`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortfolioAggregator {
    event_window: usize,
}

impl Default for PortfolioAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_WINDOW)
    }
}

impl PortfolioAggregator {
    /// Aggregator keeping `event_window` upcoming events.
    #[must_use]
    pub const fn new(event_window: usize) -> Self {
        Self { event_window }
    }

    /// Configured event window.
    #[must_use]
    pub const fn event_window(&self) -> usize {
        self.event_window
    }

    /// Analyse against the current time.
    #[must_use]
    pub fn analyze(&self, holdings: &[Holding], prices: &PriceSnapshot) -> PortfolioAnalysis {
        self.analyze_at(holdings, prices, Utc::now())
    }

    /// Analyse with an explicit evaluation instant.
    #[must_use]
    pub fn analyze_at(
        &self,
        holdings: &[Holding],
        prices: &PriceSnapshot,
        now: DateTime<Utc>,
    ) -> PortfolioAnalysis {
        let mut analysis = PortfolioAnalysis::empty(now);
        let mut weighted_yield = Decimal::ZERO;

        for holding in holdings {
            let mut view = value_holding(holding, prices);
            if view.issue.is_none() {
                let totals = add_to_totals(&analysis, weighted_yield, &view);
                match totals {
                    Some((value, invested, profit_loss, weighted)) => {
                        analysis.total_current_value = value;
                        analysis.total_invested = invested;
                        analysis.total_profit_loss = profit_loss;
                        weighted_yield = weighted;
                    }
                    None => view.degrade(HoldingIssue::Overflow),
                }
            }
            analysis.holdings.push(view);
        }

        analysis.total_profit_loss_percentage =
            percentage(analysis.total_profit_loss, analysis.total_invested)
                .unwrap_or(Decimal::ZERO);

        let total_value = analysis.total_current_value;
        if !total_value.is_zero() {
            analysis.average_dividend_yield =
                weighted_yield.checked_div(total_value).unwrap_or(Decimal::ZERO);
            for view in analysis.holdings.iter_mut().filter(|v| v.issue.is_none()) {
                view.allocation_percentage =
                    percentage(view.current_value, total_value).unwrap_or(Decimal::ZERO);
            }
        }

        analysis.dividends = project_dividends(total_value, analysis.average_dividend_yield);
        analysis.upcoming_events = upcoming_events(holdings, now, self.event_window);
        analysis
    }
}

// =============================================================================
// Arithmetic
// =============================================================================

fn value_holding(holding: &Holding, prices: &PriceSnapshot) -> HoldingView {
    let profile = &holding.profile;
    let (current_price, price_status) = prices.price_of(&holding.symbol).map_or_else(
        || {
            profile.reference_price.map_or(
                (Decimal::ZERO, PriceStatus::Missing),
                |price| (price, PriceStatus::Reference),
            )
        },
        |price| (price, PriceStatus::Live),
    );

    let mut view = HoldingView {
        id: holding.id,
        symbol: holding.symbol.clone(),
        company_name: profile.company_name.clone(),
        quantity: holding.quantity,
        average_buy_price: holding.average_buy_price,
        total_invested: holding.total_invested,
        current_price,
        current_value: Decimal::ZERO,
        profit_loss: Decimal::ZERO,
        profit_loss_percentage: Decimal::ZERO,
        dividend_yield: Decimal::ZERO,
        allocation_percentage: Decimal::ZERO,
        price_status,
        issue: None,
    };

    if let Err(issue) = fill_valuation(&mut view, holding) {
        view.degrade(issue);
    }
    view
}

fn fill_valuation(view: &mut HoldingView, holding: &Holding) -> Result<(), HoldingIssue> {
    if holding.quantity.is_sign_negative() && !holding.quantity.is_zero() {
        return Err(HoldingIssue::NegativeQuantity);
    }
    if holding.total_invested.is_sign_negative() && !holding.total_invested.is_zero() {
        return Err(HoldingIssue::NegativeCostBasis);
    }
    if view.current_price.is_sign_negative() && !view.current_price.is_zero() {
        return Err(HoldingIssue::NegativePrice);
    }

    view.current_value = holding
        .quantity
        .checked_mul(view.current_price)
        .ok_or(HoldingIssue::Overflow)?;
    view.profit_loss = view
        .current_value
        .checked_sub(holding.total_invested)
        .ok_or(HoldingIssue::Overflow)?;
    view.profit_loss_percentage =
        percentage(view.profit_loss, holding.total_invested).ok_or(HoldingIssue::Overflow)?;
    view.dividend_yield = dividend_yield(holding, view.current_price);
    Ok(())
}

/// Stated yield, else annual dividend over price, else zero.
fn dividend_yield(holding: &Holding, price: Decimal) -> Decimal {
    let profile = &holding.profile;
    if let Some(stated) = profile.dividend_yield {
        return stated;
    }
    match profile.annual_dividend {
        Some(annual) if price > Decimal::ZERO => annual
            .checked_div(price)
            .and_then(|ratio| ratio.checked_mul(HUNDRED))
            .unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    }
}

fn add_to_totals(
    analysis: &PortfolioAnalysis,
    weighted_yield: Decimal,
    view: &HoldingView,
) -> Option<(Decimal, Decimal, Decimal, Decimal)> {
    Some((
        analysis.total_current_value.checked_add(view.current_value)?,
        analysis.total_invested.checked_add(view.total_invested)?,
        analysis.total_profit_loss.checked_add(view.profit_loss)?,
        weighted_yield.checked_add(view.current_value.checked_mul(view.dividend_yield)?)?,
    ))
}

/// `part / whole × 100`, zero when `whole` is zero. `None` on overflow.
fn percentage(part: Decimal, whole: Decimal) -> Option<Decimal> {
    if whole.is_zero() {
        return Some(Decimal::ZERO);
    }
    part.checked_div(whole)?.checked_mul(HUNDRED)
}

fn project_dividends(total_value: Decimal, average_yield: Decimal) -> DividendProjection {
    let annual = total_value
        .checked_mul(average_yield)
        .and_then(|v| v.checked_div(HUNDRED))
        .unwrap_or(Decimal::ZERO);

    DividendProjection {
        annual,
        monthly: annual / MONTHS_PER_YEAR,
        daily: annual / DAYS_PER_YEAR,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::portfolio::StockProfile;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 9, 30, 0).unwrap()
    }

    fn holding(id: i64, symbol: &str, quantity: Decimal, invested: Decimal) -> Holding {
        Holding::new(HoldingId(id), Symbol::new(symbol), quantity, Decimal::ZERO)
            .with_total_invested(invested)
    }

    fn prices(entries: &[(&str, Decimal)]) -> PriceSnapshot {
        PriceSnapshot::from_prices(entries.iter().copied(), now())
    }

    #[test]
    fn empty_portfolio_is_all_zero() {
        let analysis = PortfolioAggregator::default().analyze(&[], &PriceSnapshot::empty());

        assert!(analysis.holdings.is_empty());
        assert!(analysis.upcoming_events.is_empty());
        assert_eq!(analysis.total_current_value, Decimal::ZERO);
        assert_eq!(analysis.total_invested, Decimal::ZERO);
        assert_eq!(analysis.total_profit_loss, Decimal::ZERO);
        assert_eq!(analysis.total_profit_loss_percentage, Decimal::ZERO);
        assert_eq!(analysis.average_dividend_yield, Decimal::ZERO);
        assert_eq!(analysis.dividends, DividendProjection::default());
    }

    #[test]
    fn single_holding_gain() {
        let holdings = vec![holding(1, "A", dec!(10), dec!(1000))];

        let analysis =
            PortfolioAggregator::default().analyze_at(&holdings, &prices(&[("A", dec!(120))]), now());

        let view = &analysis.holdings[0];
        assert_eq!(view.current_value, dec!(1200));
        assert_eq!(view.profit_loss, dec!(200));
        assert_eq!(view.profit_loss_percentage, dec!(20));
        assert_eq!(view.allocation_percentage, dec!(100));
        assert_eq!(view.price_status, PriceStatus::Live);
        assert_eq!(analysis.total_profit_loss_percentage, dec!(20));
    }

    #[test]
    fn zero_cost_basis_has_zero_percentage() {
        let holdings = vec![holding(1, "GIFT", dec!(5), Decimal::ZERO)];

        let analysis =
            PortfolioAggregator::default().analyze_at(&holdings, &prices(&[("GIFT", dec!(10))]), now());

        assert_eq!(analysis.holdings[0].profit_loss, dec!(50));
        assert_eq!(analysis.holdings[0].profit_loss_percentage, Decimal::ZERO);
        assert_eq!(analysis.total_profit_loss_percentage, Decimal::ZERO);
    }

    #[test]
    fn falls_back_to_reference_price() {
        let holdings = vec![holding(1, "AAPL", dec!(2), dec!(200)).with_profile(StockProfile {
            reference_price: Some(dec!(110)),
            ..StockProfile::default()
        })];

        let analysis =
            PortfolioAggregator::default().analyze_at(&holdings, &PriceSnapshot::empty(), now());

        let view = &analysis.holdings[0];
        assert_eq!(view.price_status, PriceStatus::Reference);
        assert_eq!(view.current_value, dec!(220));
        assert!(view.is_stale());
        assert_eq!(analysis.stale_count(), 1);
    }

    #[test]
    fn missing_price_values_at_zero() {
        let holdings = vec![holding(1, "ZZZ", dec!(3), dec!(30))];

        let analysis =
            PortfolioAggregator::default().analyze_at(&holdings, &PriceSnapshot::empty(), now());

        let view = &analysis.holdings[0];
        assert_eq!(view.price_status, PriceStatus::Missing);
        assert_eq!(view.current_value, Decimal::ZERO);
        assert_eq!(view.profit_loss, dec!(-30));
        assert_eq!(view.profit_loss_percentage, dec!(-100));
    }

    #[test]
    fn negative_quantity_is_degraded_not_fatal() {
        let holdings = vec![
            holding(1, "BAD", dec!(-4), dec!(100)),
            holding(2, "GOOD", dec!(1), dec!(50)),
        ];

        let analysis = PortfolioAggregator::default().analyze_at(
            &holdings,
            &prices(&[("BAD", dec!(10)), ("GOOD", dec!(60))]),
            now(),
        );

        assert_eq!(analysis.holdings[0].issue, Some(HoldingIssue::NegativeQuantity));
        assert_eq!(analysis.holdings[0].current_value, Decimal::ZERO);
        assert_eq!(analysis.total_current_value, dec!(60));
        assert_eq!(analysis.total_invested, dec!(50));
        assert_eq!(analysis.total_profit_loss, dec!(10));
    }

    #[test]
    fn negative_cost_basis_is_degraded() {
        let holdings = vec![holding(1, "X", dec!(1), dec!(-1))];

        let analysis =
            PortfolioAggregator::default().analyze_at(&holdings, &prices(&[("X", dec!(1))]), now());

        assert_eq!(analysis.holdings[0].issue, Some(HoldingIssue::NegativeCostBasis));
        assert_eq!(analysis.total_invested, Decimal::ZERO);
    }

    #[test]
    fn overflow_is_degraded() {
        let holdings = vec![
            holding(1, "HUGE", Decimal::MAX, Decimal::ZERO),
            holding(2, "OK", dec!(1), dec!(1)),
        ];

        let analysis = PortfolioAggregator::default().analyze_at(
            &holdings,
            &prices(&[("HUGE", dec!(2)), ("OK", dec!(3))]),
            now(),
        );

        assert_eq!(analysis.holdings[0].issue, Some(HoldingIssue::Overflow));
        assert_eq!(analysis.total_current_value, dec!(3));
    }

    #[test]
    fn value_weighted_dividend_yield() {
        let holdings = vec![
            holding(1, "KO", dec!(10), dec!(500)).with_profile(StockProfile {
                dividend_yield: Some(dec!(3)),
                ..StockProfile::default()
            }),
            holding(2, "TSLA", dec!(1), dec!(100)).with_profile(StockProfile::default()),
        ];

        let analysis = PortfolioAggregator::default().analyze_at(
            &holdings,
            &prices(&[("KO", dec!(60)), ("TSLA", dec!(200))]),
            now(),
        );

        // 600 at 3% and 200 at 0% -> 1800 / 800
        assert_eq!(analysis.total_current_value, dec!(800));
        assert_eq!(analysis.average_dividend_yield, dec!(2.25));
        assert_eq!(analysis.dividends.annual, dec!(18));
        assert_eq!(analysis.dividends.monthly, dec!(1.5));
        assert_eq!(analysis.dividends.daily.round_dp(4), dec!(0.0493));
        assert_eq!(analysis.holdings[0].allocation_percentage, dec!(75));
        assert_eq!(analysis.holdings[1].allocation_percentage, dec!(25));
    }

    #[test]
    fn yield_derived_from_annual_dividend() {
        let holdings = vec![holding(1, "T", dec!(1), dec!(20)).with_profile(StockProfile {
            annual_dividend: Some(dec!(1.11)),
            ..StockProfile::default()
        })];

        let analysis =
            PortfolioAggregator::default().analyze_at(&holdings, &prices(&[("T", dec!(22.2))]), now());

        assert_eq!(analysis.holdings[0].dividend_yield, dec!(5));
    }

    #[test]
    fn events_use_configured_window() {
        let holdings: Vec<_> = (0..4)
            .map(|i| {
                holding(i, &format!("S{i}"), dec!(1), dec!(1)).with_profile(StockProfile {
                    next_dividend_date: Some(now() + Duration::days(i + 1)),
                    next_earnings_date: Some(now() + Duration::days(i + 10)),
                    ..StockProfile::default()
                })
            })
            .collect();

        let analysis =
            PortfolioAggregator::new(3).analyze_at(&holdings, &PriceSnapshot::empty(), now());

        assert_eq!(analysis.upcoming_events.len(), 3);
        assert_eq!(PortfolioAggregator::default().event_window(), 5);
    }

    fn arb_holding() -> impl Strategy<Value = (u8, i64, i64, Option<i64>, Option<i64>)> {
        (
            0u8..6,
            0i64..10_000,
            0i64..1_000_000,
            proptest::option::of(0i64..100_000),
            proptest::option::of(-30i64..60),
        )
    }

    proptest! {
        #[test]
        fn totals_match_holdings(entries in proptest::collection::vec(arb_holding(), 0..12)) {
            let symbols = ["AAPL", "MSFT", "KO", "T", "PEP", "O"];
            let mut snapshot = Vec::new();
            let holdings: Vec<_> = entries
                .iter()
                .enumerate()
                .map(|(i, (sym, qty, invested, price, event_day))| {
                    let symbol = symbols[*sym as usize];
                    if let Some(p) = price {
                        snapshot.push((symbol, Decimal::new(*p, 2)));
                    }
                    holding(i as i64, symbol, Decimal::from(*qty), Decimal::new(*invested, 2))
                        .with_profile(StockProfile {
                            next_earnings_date: event_day.map(|d| now() + Duration::days(d)),
                            ..StockProfile::default()
                        })
                })
                .collect();

            let analysis = PortfolioAggregator::default()
                .analyze_at(&holdings, &prices(&snapshot), now());

            let value: Decimal = analysis.holdings.iter().map(|h| h.current_value).sum();
            let invested: Decimal = analysis.holdings.iter().map(|h| h.total_invested).sum();
            prop_assert_eq!(analysis.total_current_value, value);
            prop_assert_eq!(analysis.total_invested, invested);
            prop_assert_eq!(analysis.total_profit_loss, value - invested);

            for view in &analysis.holdings {
                if view.total_invested.is_zero() {
                    prop_assert_eq!(view.profit_loss_percentage, Decimal::ZERO);
                }
            }

            if !value.is_zero() {
                let allocated: Decimal =
                    analysis.holdings.iter().map(|h| h.allocation_percentage).sum();
                prop_assert!((allocated - dec!(100)).abs() < dec!(0.000001));
            }

            prop_assert!(analysis.upcoming_events.len() <= DEFAULT_EVENT_WINDOW);
            prop_assert!(analysis.upcoming_events.iter().all(|e| e.date >= now()));
            prop_assert!(analysis.upcoming_events.windows(2).all(|w| w[0].date <= w[1].date));
        }
    }
}
