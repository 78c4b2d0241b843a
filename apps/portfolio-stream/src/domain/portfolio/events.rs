//! Upcoming dividend and earnings events.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::Holding;
use crate::domain::streaming::Symbol;

/// Kind of scheduled corporate event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Dividend date.
    Dividend,
    /// Earnings report.
    Earnings,
}

/// A dated event for a held symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioEvent {
    /// Symbol the event belongs to.
    pub symbol: Symbol,
    /// Company display name, when the backend knows it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    /// Event kind.
    pub kind: EventKind,
    /// Scheduled date.
    pub date: DateTime<Utc>,
    /// Annual dividend per share for dividend events, 0 when unknown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
}

impl PortfolioEvent {
    fn sort_key(&self) -> (DateTime<Utc>, &Symbol, EventKind) {
        (self.date, &self.symbol, self.kind)
    }
}

/// The `limit` nearest events on or after `now`, ascending by date.
///
/// Each holding contributes at most one dividend and one earnings event.
/// Identical events from several holdings of the same symbol collapse
/// into one. Ties on date order by symbol, then dividends first.
#[must_use]
pub fn upcoming_events(holdings: &[Holding], now: DateTime<Utc>, limit: usize) -> Vec<PortfolioEvent> {
    let mut seen = BTreeSet::new();
    let mut events: Vec<PortfolioEvent> = holdings
        .iter()
        .flat_map(|holding| {
            let profile = &holding.profile;
            [
                profile.next_dividend_date.map(|date| (EventKind::Dividend, date)),
                profile.next_earnings_date.map(|date| (EventKind::Earnings, date)),
            ]
            .into_iter()
            .flatten()
            .map(move |(kind, date)| PortfolioEvent {
                symbol: holding.symbol.clone(),
                company_name: profile.company_name.clone(),
                kind,
                date,
                amount: (kind == EventKind::Dividend)
                    .then(|| profile.annual_dividend.unwrap_or(Decimal::ZERO)),
            })
        })
        .filter(|event| event.date >= now)
        .filter(|event| seen.insert((event.date, event.symbol.clone(), event.kind)))
        .collect();

    events.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    events.truncate(limit);
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::portfolio::{HoldingId, StockProfile};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn holding(id: i64, symbol: &str, dividend: Option<i64>, earnings: Option<i64>) -> Holding {
        Holding::new(HoldingId(id), Symbol::new(symbol), dec!(1), dec!(10)).with_profile(
            StockProfile {
                next_dividend_date: dividend.map(|d| now() + Duration::days(d)),
                next_earnings_date: earnings.map(|d| now() + Duration::days(d)),
                ..StockProfile::default()
            },
        )
    }

    #[test]
    fn past_events_are_dropped() {
        let holdings = vec![holding(1, "AAPL", Some(-3), Some(4))];

        let events = upcoming_events(&holdings, now(), 5);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Earnings);
    }

    #[test]
    fn event_at_now_is_kept() {
        let holdings = vec![holding(1, "AAPL", Some(0), None)];

        assert_eq!(upcoming_events(&holdings, now(), 5).len(), 1);
    }

    #[test]
    fn sorted_and_truncated() {
        let holdings = vec![
            holding(1, "AAPL", Some(9), Some(2)),
            holding(2, "MSFT", Some(1), Some(7)),
            holding(3, "KO", Some(5), Some(3)),
        ];

        let events = upcoming_events(&holdings, now(), 5);

        let days: Vec<_> = events.iter().map(|e| (e.date - now()).num_days()).collect();
        assert_eq!(days, vec![1, 2, 3, 5, 7]);
    }

    #[test]
    fn events_carry_company_and_dividend_amount() {
        let mut with_dividend = holding(1, "KO", Some(2), Some(4));
        with_dividend.profile.company_name = Some("Coca-Cola".into());
        with_dividend.profile.annual_dividend = Some(dec!(1.94));
        let without_amount = holding(2, "PEP", Some(3), None);

        let events = upcoming_events(&[with_dividend, without_amount], now(), 5);

        assert_eq!(events[0].company_name.as_deref(), Some("Coca-Cola"));
        assert_eq!(events[0].amount, Some(dec!(1.94)));
        assert_eq!(events[1].symbol.as_str(), "PEP");
        assert_eq!(events[1].company_name, None);
        assert_eq!(events[1].amount, Some(Decimal::ZERO));
        assert_eq!(events[2].kind, EventKind::Earnings);
        assert_eq!(events[2].amount, None);

        let json = serde_json::to_value(&events[2]).unwrap();
        assert_eq!(json["companyName"], "Coca-Cola");
        assert!(json.get("amount").is_none());
    }

    #[test]
    fn duplicate_holdings_collapse() {
        let holdings = vec![
            holding(1, "AAPL", Some(2), None),
            holding(2, "AAPL", Some(2), None),
        ];

        assert_eq!(upcoming_events(&holdings, now(), 5).len(), 1);
    }

    #[test]
    fn same_day_ties_order_by_symbol_then_kind() {
        let holdings = vec![
            holding(1, "MSFT", Some(1), None),
            holding(2, "AAPL", Some(1), Some(1)),
        ];

        let events = upcoming_events(&holdings, now(), 5);

        let keys: Vec<_> = events.iter().map(|e| (e.symbol.as_str(), e.kind)).collect();
        assert_eq!(
            keys,
            vec![
                ("AAPL", EventKind::Dividend),
                ("AAPL", EventKind::Earnings),
                ("MSFT", EventKind::Dividend),
            ]
        );
    }
}
