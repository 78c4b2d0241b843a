//! Latest-quote cache shared between the multiplexer and its readers.
//!
//! Readers hold cloneable [`PriceStore`] handles. The single
//! [`PriceWriter`] is not `Clone`; whoever owns it is the only component
//! that can change prices. Each write swaps an `Arc<Quote>` under the lock,
//! so readers see either the old or the new quote, never a mix.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::streaming::{PriceSnapshot, Quote, Symbol};

type QuoteMap = HashMap<Symbol, Arc<Quote>>;

/// Read handle to the price cache.
#[derive(Debug, Clone, Default)]
pub struct PriceStore {
    quotes: Arc<RwLock<QuoteMap>>,
}

/// Exclusive write handle to the price cache.
#[derive(Debug)]
pub struct PriceWriter {
    quotes: Arc<RwLock<QuoteMap>>,
}

impl PriceStore {
    /// Create an empty store and its writer.
    #[must_use]
    pub fn with_writer() -> (Self, PriceWriter) {
        let store = Self::default();
        let writer = PriceWriter {
            quotes: Arc::clone(&store.quotes),
        };
        (store, writer)
    }

    /// Latest quote for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &Symbol) -> Option<Arc<Quote>> {
        self.quotes.read().get(symbol).cloned()
    }

    /// Whether a quote is known for `symbol`.
    #[must_use]
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.quotes.read().contains_key(symbol)
    }

    /// Copy of every known quote.
    #[must_use]
    pub fn snapshot(&self) -> PriceSnapshot {
        PriceSnapshot::from_map(self.quotes.read().clone())
    }

    /// Number of symbols with a quote.
    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.read().is_empty()
    }
}

impl PriceWriter {
    /// Replace the quote for `quote.symbol`.
    ///
    /// Returns the shared quote now visible to readers.
    pub fn set(&self, quote: Quote) -> Arc<Quote> {
        let quote = Arc::new(quote);
        self.quotes
            .write()
            .insert(quote.symbol.clone(), Arc::clone(&quote));
        quote
    }

    /// Store `quote` only if no quote is known for its symbol yet.
    ///
    /// The check and the insert happen under one write lock, so a quote
    /// written concurrently is never replaced. Returns `None` when a quote
    /// was already present.
    pub fn set_if_absent(&self, quote: Quote) -> Option<Arc<Quote>> {
        match self.quotes.write().entry(quote.symbol.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => Some(Arc::clone(slot.insert(Arc::new(quote)))),
        }
    }
}
