//! Subscription Registry
//!
//! Domain types for tracking which consumers are interested in which
//! symbols, so many consumers can share one upstream subscription.
//!
//! # Design
//!
//! The registry tracks:
//! - Which symbols each consumer is subscribed to
//! - Which consumers are attached to each symbol
//! - The desired upstream set (every symbol with at least one consumer)
//!
//! Every mutation reports whether the upstream feed needs a subscribe or
//! unsubscribe, so the caller can issue exactly one transport command per
//! symbol transition. The registry itself is not synchronised; the
//! multiplexer guards it together with the transport sends it drives.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::domain::streaming::Symbol;

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a registered consumer.
pub type ConsumerId = u64;

/// Result of attaching a consumer to a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// The consumer was already attached; nothing changed.
    AlreadySubscribed,
    /// Another consumer already holds the symbol upstream.
    Joined,
    /// First consumer for the symbol; an upstream subscribe is needed.
    FirstConsumer,
}

impl SubscribeOutcome {
    /// Whether the upstream feed must be told to subscribe.
    #[must_use]
    pub const fn needs_upstream(self) -> bool {
        matches!(self, Self::FirstConsumer)
    }
}

/// Proof of a single consumer's interest in a single symbol.
///
/// Passed back to the multiplexer to release exactly that interest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    consumer: ConsumerId,
    symbol: Symbol,
    owned: bool,
}

impl SubscriptionHandle {
    /// Handle for a consumer registered separately.
    #[must_use]
    pub const fn new(consumer: ConsumerId, symbol: Symbol) -> Self {
        Self {
            consumer,
            symbol,
            owned: false,
        }
    }

    /// Handle whose consumer exists only for this subscription.
    ///
    /// Releasing it also drops the consumer.
    #[must_use]
    pub const fn owned(consumer: ConsumerId, symbol: Symbol) -> Self {
        Self {
            consumer,
            symbol,
            owned: true,
        }
    }

    /// Consumer holding the subscription.
    #[must_use]
    pub const fn consumer(&self) -> ConsumerId {
        self.consumer
    }

    /// Subscribed symbol.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Whether the consumer lives and dies with this handle.
    #[must_use]
    pub const fn is_owned(&self) -> bool {
        self.owned
    }
}

// =============================================================================
// Subscription Changes
// =============================================================================

/// Changes to upstream subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Symbols to subscribe to.
    pub subscribe: BTreeSet<Symbol>,
    /// Symbols to unsubscribe from.
    pub unsubscribe: BTreeSet<Symbol>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }

    /// Create changes with only unsubscribes.
    #[must_use]
    pub fn unsubscribe_only(symbols: impl IntoIterator<Item = Symbol>) -> Self {
        Self {
            subscribe: BTreeSet::new(),
            unsubscribe: symbols.into_iter().collect(),
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Two-way index between consumers and symbols.
///
/// # Example
///
/// ```rust
/// use portfolio_stream::domain::streaming::Symbol;
/// use portfolio_stream::domain::subscription::{SubscribeOutcome, SubscriptionRegistry};
///
/// let mut registry = SubscriptionRegistry::new();
/// let aapl = Symbol::new("AAPL");
///
/// assert_eq!(registry.add(1, &aapl), SubscribeOutcome::FirstConsumer);
/// assert_eq!(registry.add(2, &aapl), SubscribeOutcome::Joined);
///
/// // Consumer 1 leaves; still held by consumer 2
/// assert!(!registry.remove(1, &aapl));
///
/// // Last consumer leaves; upstream unsubscribe needed
/// assert!(registry.remove(2, &aapl));
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    consumer_symbols: HashMap<ConsumerId, HashSet<Symbol>>,
    symbol_consumers: HashMap<Symbol, HashSet<ConsumerId>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `consumer` to `symbol`.
    pub fn add(&mut self, consumer: ConsumerId, symbol: &Symbol) -> SubscribeOutcome {
        let symbols = self.consumer_symbols.entry(consumer).or_default();
        if !symbols.insert(symbol.clone()) {
            return SubscribeOutcome::AlreadySubscribed;
        }

        let consumers = self.symbol_consumers.entry(symbol.clone()).or_default();
        consumers.insert(consumer);

        if consumers.len() == 1 {
            SubscribeOutcome::FirstConsumer
        } else {
            SubscribeOutcome::Joined
        }
    }

    /// Detach `consumer` from `symbol`.
    ///
    /// Returns `true` when the symbol lost its last consumer and must be
    /// unsubscribed upstream.
    pub fn remove(&mut self, consumer: ConsumerId, symbol: &Symbol) -> bool {
        let Some(symbols) = self.consumer_symbols.get_mut(&consumer) else {
            return false;
        };
        if !symbols.remove(symbol) {
            return false;
        }
        if symbols.is_empty() {
            self.consumer_symbols.remove(&consumer);
        }

        self.release(consumer, symbol)
    }

    /// Detach `consumer` from everything.
    ///
    /// Returns symbols that need upstream unsubscription.
    pub fn remove_consumer(&mut self, consumer: ConsumerId) -> SubscriptionChanges {
        let Some(symbols) = self.consumer_symbols.remove(&consumer) else {
            return SubscriptionChanges::default();
        };

        let released = symbols
            .into_iter()
            .filter(|symbol| self.release(consumer, symbol));
        SubscriptionChanges::unsubscribe_only(released.collect::<Vec<_>>())
    }

    /// Make `consumer`'s symbol set equal to `wanted`.
    ///
    /// Returns the upstream transitions the change causes.
    pub fn retain(&mut self, consumer: ConsumerId, wanted: &HashSet<Symbol>) -> SubscriptionChanges {
        let current = self.symbols_of(consumer);
        let mut changes = SubscriptionChanges::default();

        for symbol in current.iter().filter(|s| !wanted.contains(*s)) {
            if self.remove(consumer, symbol) {
                changes.unsubscribe.insert(symbol.clone());
            }
        }
        for symbol in wanted.iter().filter(|s| !current.contains(*s)) {
            if self.add(consumer, symbol).needs_upstream() {
                changes.subscribe.insert(symbol.clone());
            }
        }

        changes
    }

    /// Consumers attached to a symbol.
    #[must_use]
    pub fn consumers_of(&self, symbol: &Symbol) -> Vec<ConsumerId> {
        self.symbol_consumers
            .get(symbol)
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Symbols a consumer is attached to.
    #[must_use]
    pub fn symbols_of(&self, consumer: ConsumerId) -> HashSet<Symbol> {
        self.consumer_symbols
            .get(&consumer)
            .cloned()
            .unwrap_or_default()
    }

    /// Every symbol with at least one consumer, in sorted order.
    #[must_use]
    pub fn desired_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<_> = self.symbol_consumers.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Whether any consumer wants `symbol`.
    #[must_use]
    pub fn is_desired(&self, symbol: &Symbol) -> bool {
        self.symbol_consumers.contains_key(symbol)
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            symbol_count: self.symbol_consumers.len(),
            consumer_count: self.consumer_symbols.len(),
        }
    }

    fn release(&mut self, consumer: ConsumerId, symbol: &Symbol) -> bool {
        let Some(consumers) = self.symbol_consumers.get_mut(symbol) else {
            return false;
        };
        consumers.remove(&consumer);

        if consumers.is_empty() {
            self.symbol_consumers.remove(symbol);
            true
        } else {
            false
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SubscriptionStats {
    /// Number of unique symbols subscribed upstream.
    pub symbol_count: usize,
    /// Number of consumers holding at least one symbol.
    pub consumer_count: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::new(s)
    }

    #[test]
    fn add_new_symbol_needs_upstream() {
        let mut registry = SubscriptionRegistry::new();

        let outcome = registry.add(1, &sym("AAPL"));

        assert_eq!(outcome, SubscribeOutcome::FirstConsumer);
        assert!(outcome.needs_upstream());
    }

    #[test]
    fn add_existing_symbol_joins() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(1, &sym("AAPL"));

        let outcome = registry.add(2, &sym("AAPL"));

        assert_eq!(outcome, SubscribeOutcome::Joined);
        assert!(!outcome.needs_upstream());
    }

    #[test]
    fn add_duplicate_consumer_is_noop() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(1, &sym("AAPL"));

        assert_eq!(
            registry.add(1, &sym("AAPL")),
            SubscribeOutcome::AlreadySubscribed
        );
        assert_eq!(registry.consumers_of(&sym("AAPL")), vec![1]);
    }

    #[test]
    fn remove_with_remaining_consumers_keeps_symbol() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(1, &sym("AAPL"));
        registry.add(2, &sym("AAPL"));

        assert!(!registry.remove(1, &sym("AAPL")));
        assert!(registry.is_desired(&sym("AAPL")));
        assert_eq!(registry.consumers_of(&sym("AAPL")), vec![2]);
    }

    #[test]
    fn remove_last_consumer_releases_symbol() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(1, &sym("AAPL"));

        assert!(registry.remove(1, &sym("AAPL")));
        assert!(registry.desired_symbols().is_empty());
        assert_eq!(registry.stats(), SubscriptionStats::default());
    }

    #[test]
    fn remove_unknown_is_noop() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(1, &sym("AAPL"));

        assert!(!registry.remove(2, &sym("AAPL")));
        assert!(!registry.remove(1, &sym("MSFT")));
        assert_eq!(registry.desired_symbols(), vec![sym("AAPL")]);
    }

    #[test]
    fn remove_consumer_cleans_up() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(1, &sym("AAPL"));
        registry.add(1, &sym("MSFT"));
        registry.add(2, &sym("MSFT"));

        let changes = registry.remove_consumer(1);

        assert!(changes.unsubscribe.contains(&sym("AAPL")));
        assert!(!changes.unsubscribe.contains(&sym("MSFT")));
        assert_eq!(registry.desired_symbols(), vec![sym("MSFT")]);
    }

    #[test]
    fn remove_consumer_unknown_no_changes() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(1, &sym("AAPL"));

        assert!(registry.remove_consumer(2).is_empty());
        assert_eq!(registry.stats().symbol_count, 1);
    }

    #[test]
    fn retain_reports_transitions() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(1, &sym("AAPL"));
        registry.add(1, &sym("MSFT"));
        registry.add(2, &sym("MSFT"));

        let wanted: HashSet<_> = [sym("GOOG")].into_iter().collect();
        let changes = registry.retain(1, &wanted);

        assert_eq!(changes.subscribe.iter().collect::<Vec<_>>(), vec![&sym("GOOG")]);
        assert_eq!(changes.unsubscribe.iter().collect::<Vec<_>>(), vec![&sym("AAPL")]);
        assert_eq!(registry.symbols_of(1), wanted);
    }

    #[test]
    fn retain_same_set_is_noop() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(1, &sym("AAPL"));

        let wanted: HashSet<_> = [sym("AAPL")].into_iter().collect();
        assert!(registry.retain(1, &wanted).is_empty());
    }

    #[test]
    fn desired_symbols_sorted() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(1, &sym("MSFT"));
        registry.add(2, &sym("AAPL"));
        registry.add(3, &sym("GOOG"));

        assert_eq!(
            registry.desired_symbols(),
            vec![sym("AAPL"), sym("GOOG"), sym("MSFT")]
        );
    }

    #[test]
    fn stats_are_accurate() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(1, &sym("AAPL"));
        registry.add(1, &sym("MSFT"));
        registry.add(2, &sym("AAPL"));

        let stats = registry.stats();

        assert_eq!(stats.symbol_count, 2);
        assert_eq!(stats.consumer_count, 2);
    }

    #[test]
    fn handle_accessors() {
        let handle = SubscriptionHandle::owned(7, sym("aapl"));

        assert_eq!(handle.consumer(), 7);
        assert_eq!(handle.symbol().as_str(), "AAPL");
        assert!(handle.is_owned());
        assert!(!SubscriptionHandle::new(7, sym("AAPL")).is_owned());
    }
}
