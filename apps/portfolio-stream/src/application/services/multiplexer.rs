//! Subscription Multiplexer
//!
//! Shares one price feed connection between any number of consumers.
//!
//! - Consumers register a [`QuoteHandler`] and subscribe it to symbols.
//! - The first consumer of a symbol triggers the only upstream subscribe;
//!   the last one leaving triggers the only upstream unsubscribe.
//! - Every `Connected` event re-subscribes the whole desired set.
//! - Inbound frames are decoded, written to the [`PriceStore`], then handed
//!   to every handler attached to the quote's symbol.
//!
//! Registry changes and the transport commands they cause happen under one
//! lock, so the feed sees subscribe/unsubscribe in the order the registry
//! changed. Handlers are invoked after that lock is released.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::price_store::{PriceStore, PriceWriter};
use crate::application::ports::{
    DecodedFrame, FeedCommand, FeedEvent, FrameDecoder, PriceFeedTransport, TransportError,
};
use crate::domain::streaming::{Quote, Symbol};
use crate::domain::subscription::{
    ConsumerId, SubscriptionChanges, SubscriptionHandle, SubscriptionRegistry, SubscriptionStats,
};
use crate::infrastructure::metrics::{self, HandlerFailure, QuoteSource};

// =============================================================================
// Handlers
// =============================================================================

/// Failure reported by a quote handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The receiving side has gone away.
    #[error("consumer closed")]
    Closed,
    /// The receiving side cannot keep up; this tick was dropped.
    #[error("consumer lagging, tick dropped")]
    Lagging,
    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}

/// Receives quotes for the symbols its consumer subscribed to.
///
/// Called from the dispatcher task; implementations must not block.
pub trait QuoteHandler: Send + Sync {
    /// Handle one quote.
    ///
    /// # Errors
    ///
    /// An error is logged and counted; other handlers still receive the quote.
    fn on_quote(&self, quote: &Arc<Quote>) -> Result<(), HandlerError>;
}

/// Adapts a closure into a [`QuoteHandler`].
pub struct FnHandler<F>(pub F);

impl<F> QuoteHandler for FnHandler<F>
where
    F: Fn(&Arc<Quote>) -> Result<(), HandlerError> + Send + Sync,
{
    fn on_quote(&self, quote: &Arc<Quote>) -> Result<(), HandlerError> {
        (self.0)(quote)
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnHandler")
    }
}

/// Wrap a closure as a shareable handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn QuoteHandler>
where
    F: Fn(&Arc<Quote>) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

impl QuoteHandler for mpsc::Sender<Arc<Quote>> {
    fn on_quote(&self, quote: &Arc<Quote>) -> Result<(), HandlerError> {
        self.try_send(Arc::clone(quote)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => HandlerError::Lagging,
            mpsc::error::TrySendError::Closed(_) => HandlerError::Closed,
        })
    }
}

impl QuoteHandler for mpsc::UnboundedSender<Arc<Quote>> {
    fn on_quote(&self, quote: &Arc<Quote>) -> Result<(), HandlerError> {
        self.send(Arc::clone(quote)).map_err(|_| HandlerError::Closed)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors from multiplexer operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MultiplexerError {
    /// The consumer was never registered or has been deregistered.
    #[error("unknown consumer {0}")]
    UnknownConsumer(ConsumerId),
    /// The symbol is blank after normalisation.
    #[error("symbol must not be empty")]
    EmptySymbol,
}

// =============================================================================
// Multiplexer
// =============================================================================

/// Fans one price feed out to many consumers.
pub struct SubscriptionMultiplexer {
    registry: Mutex<SubscriptionRegistry>,
    handlers: RwLock<HashMap<ConsumerId, Arc<dyn QuoteHandler>>>,
    transport: Arc<dyn PriceFeedTransport>,
    decoder: Arc<dyn FrameDecoder>,
    writer: PriceWriter,
    next_consumer: AtomicU64,
}

impl fmt::Debug for SubscriptionMultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionMultiplexer")
            .field("stats", &self.stats())
            .field("transport_state", &self.transport.state())
            .finish_non_exhaustive()
    }
}

impl SubscriptionMultiplexer {
    /// Create a multiplexer that owns the store's writer.
    #[must_use]
    pub fn new(
        transport: Arc<dyn PriceFeedTransport>,
        decoder: Arc<dyn FrameDecoder>,
        writer: PriceWriter,
    ) -> Self {
        Self {
            registry: Mutex::new(SubscriptionRegistry::new()),
            handlers: RwLock::new(HashMap::new()),
            transport,
            decoder,
            writer,
            next_consumer: AtomicU64::new(1),
        }
    }

    /// Create a multiplexer together with a fresh price store.
    #[must_use]
    pub fn with_store(
        transport: Arc<dyn PriceFeedTransport>,
        decoder: Arc<dyn FrameDecoder>,
    ) -> (Self, PriceStore) {
        let (store, writer) = PriceStore::with_writer();
        (Self::new(transport, decoder, writer), store)
    }

    // -------------------------------------------------------------------------
    // Consumers
    // -------------------------------------------------------------------------

    /// Register a handler and return its consumer id.
    pub fn register(&self, handler: Arc<dyn QuoteHandler>) -> ConsumerId {
        let consumer = self.next_consumer.fetch_add(1, Ordering::Relaxed);
        self.handlers.write().insert(consumer, handler);
        tracing::debug!(consumer, "Consumer registered");
        consumer
    }

    /// Drop a consumer and every subscription it holds.
    pub fn deregister(&self, consumer: ConsumerId) -> SubscriptionChanges {
        let mut registry = self.registry.lock();
        let changes = registry.remove_consumer(consumer);
        for symbol in &changes.unsubscribe {
            self.send(FeedCommand::Unsubscribe(symbol.clone()));
        }
        self.handlers.write().remove(&consumer);
        metrics::set_subscribed_symbols(registry.stats().symbol_count);
        drop(registry);

        tracing::debug!(consumer, released = changes.unsubscribe.len(), "Consumer deregistered");
        changes
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Attach a registered consumer to `symbol`.
    ///
    /// Repeating the call for the same pair changes nothing and returns an
    /// equal handle.
    ///
    /// # Errors
    ///
    /// Returns [`MultiplexerError::UnknownConsumer`] for an unregistered id
    /// and [`MultiplexerError::EmptySymbol`] for a blank symbol.
    pub fn subscribe(
        &self,
        consumer: ConsumerId,
        symbol: impl Into<Symbol>,
    ) -> Result<SubscriptionHandle, MultiplexerError> {
        let symbol = checked_symbol(symbol)?;
        self.attach(consumer, &symbol)?;
        Ok(SubscriptionHandle::new(consumer, symbol))
    }

    /// Register `handler` as a one-off consumer of `symbol`.
    ///
    /// Unsubscribing the returned handle also drops the handler.
    ///
    /// # Errors
    ///
    /// Returns [`MultiplexerError::EmptySymbol`] for a blank symbol; the
    /// handler is not registered in that case.
    pub fn subscribe_with(
        &self,
        symbol: impl Into<Symbol>,
        handler: Arc<dyn QuoteHandler>,
    ) -> Result<SubscriptionHandle, MultiplexerError> {
        let symbol = checked_symbol(symbol)?;
        let consumer = self.register(handler);
        self.attach(consumer, &symbol)?;
        Ok(SubscriptionHandle::owned(consumer, symbol))
    }

    /// Release exactly the interest `handle` represents.
    ///
    /// Returns `true` when the symbol lost its last consumer.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut registry = self.registry.lock();
        let released = registry.remove(handle.consumer(), handle.symbol());
        if released {
            self.send(FeedCommand::Unsubscribe(handle.symbol().clone()));
        }
        if handle.is_owned() {
            registry.remove_consumer(handle.consumer());
            self.handlers.write().remove(&handle.consumer());
        }
        metrics::set_subscribed_symbols(registry.stats().symbol_count);
        drop(registry);

        tracing::debug!(
            consumer = handle.consumer(),
            symbol = %handle.symbol(),
            released,
            "Unsubscribed"
        );
        released
    }

    /// Make `consumer`'s subscriptions exactly `symbols`.
    ///
    /// Blank symbols are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`MultiplexerError::UnknownConsumer`] for an unregistered id.
    pub fn retain(
        &self,
        consumer: ConsumerId,
        symbols: impl IntoIterator<Item = Symbol>,
    ) -> Result<SubscriptionChanges, MultiplexerError> {
        let wanted: HashSet<Symbol> = symbols.into_iter().filter(|s| !s.is_empty()).collect();

        let mut registry = self.registry.lock();
        self.ensure_registered(consumer)?;
        let changes = registry.retain(consumer, &wanted);
        for symbol in &changes.unsubscribe {
            self.send(FeedCommand::Unsubscribe(symbol.clone()));
        }
        for symbol in &changes.subscribe {
            self.send(FeedCommand::Subscribe(symbol.clone()));
        }
        metrics::set_subscribed_symbols(registry.stats().symbol_count);
        drop(registry);

        if !changes.is_empty() {
            tracing::debug!(
                consumer,
                subscribed = ?changes.subscribe,
                unsubscribed = ?changes.unsubscribe,
                "Consumer subscriptions synchronised"
            );
        }
        Ok(changes)
    }

    /// Every symbol with at least one consumer.
    #[must_use]
    pub fn desired_symbols(&self) -> Vec<Symbol> {
        self.registry.lock().desired_symbols()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        self.registry.lock().stats()
    }

    fn attach(&self, consumer: ConsumerId, symbol: &Symbol) -> Result<(), MultiplexerError> {
        let mut registry = self.registry.lock();
        self.ensure_registered(consumer)?;
        let outcome = registry.add(consumer, symbol);
        if outcome.needs_upstream() {
            self.send(FeedCommand::Subscribe(symbol.clone()));
        }
        metrics::set_subscribed_symbols(registry.stats().symbol_count);
        drop(registry);

        tracing::debug!(consumer, symbol = %symbol, ?outcome, "Subscribed");
        Ok(())
    }

    /// Must be called with the registry lock held; `deregister` removes the
    /// handler under that same lock.
    fn ensure_registered(&self, consumer: ConsumerId) -> Result<(), MultiplexerError> {
        if self.handlers.read().contains_key(&consumer) {
            Ok(())
        } else {
            Err(MultiplexerError::UnknownConsumer(consumer))
        }
    }

    fn send(&self, command: FeedCommand) {
        match self.transport.send(command) {
            Ok(()) => {}
            Err(TransportError::NotConnected) => {
                tracing::trace!("Feed not connected, command deferred to reconnect");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to send feed command");
            }
        }
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Process transport events until the channel closes or `cancel` fires.
    pub async fn run(&self, mut events: mpsc::Receiver<FeedEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Multiplexer cancelled");
                    return;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::info!("Feed event channel closed");
                        return;
                    };
                    self.handle_event(event);
                }
            }
        }
    }

    /// Process one transport event.
    pub fn handle_event(&self, event: FeedEvent) {
        match event {
            FeedEvent::Connected => {
                metrics::set_feed_connected(true);
                self.resubscribe_all();
            }
            FeedEvent::Disconnected => {
                metrics::set_feed_connected(false);
                tracing::info!("Price feed disconnected");
            }
            FeedEvent::Reconnecting { attempt } => {
                metrics::record_reconnect();
                tracing::debug!(attempt, "Price feed reconnecting");
            }
            FeedEvent::Error(message) => {
                tracing::warn!(error = %message, "Price feed error");
            }
            FeedEvent::Message(text) => self.handle_frame(&text),
        }
    }

    /// Seed a quote obtained outside the stream and dispatch it.
    ///
    /// A quote already delivered by the stream is newer and is kept; the
    /// seed is then discarded. Returns whether the seed was applied.
    pub fn apply_quote(&self, quote: Quote) -> bool {
        self.apply(quote, QuoteSource::Rest)
    }

    fn resubscribe_all(&self) {
        let registry = self.registry.lock();
        let symbols = registry.desired_symbols();
        for symbol in &symbols {
            self.send(FeedCommand::Subscribe(symbol.clone()));
        }
        drop(registry);

        tracing::info!(count = symbols.len(), "Price feed connected, subscriptions restored");
    }

    fn handle_frame(&self, text: &str) {
        metrics::record_frame_received();

        match self.decoder.decode(text) {
            Ok(DecodedFrame::Quotes(quotes)) => {
                for quote in quotes {
                    self.apply(quote, QuoteSource::Stream);
                }
            }
            Ok(DecodedFrame::Control) => {
                tracing::trace!("Control frame");
            }
            Ok(DecodedFrame::ServerError(message)) => {
                tracing::warn!(error = %message, "Price feed reported an error");
            }
            Err(e) => {
                metrics::record_decode_error();
                tracing::warn!(error = %e, frame_len = text.len(), "Dropping undecodable frame");
            }
        }
    }

    fn apply(&self, quote: Quote, source: QuoteSource) -> bool {
        let written = match source {
            QuoteSource::Stream => Some(self.writer.set(quote)),
            QuoteSource::Rest => {
                let symbol = quote.symbol.clone();
                let written = self.writer.set_if_absent(quote);
                if written.is_none() {
                    tracing::debug!(symbol = %symbol, "Streamed quote already present, seed discarded");
                }
                written
            }
        };
        let Some(quote) = written else {
            return false;
        };
        metrics::record_quote_applied(source);
        self.dispatch(&quote);
        true
    }

    fn dispatch(&self, quote: &Arc<Quote>) {
        let targets: Vec<(ConsumerId, Arc<dyn QuoteHandler>)> = {
            let registry = self.registry.lock();
            let handlers = self.handlers.read();
            registry
                .consumers_of(&quote.symbol)
                .into_iter()
                .filter_map(|id| handlers.get(&id).map(|h| (id, Arc::clone(h))))
                .collect()
        };

        let mut delivered = 0u64;
        for (consumer, handler) in targets {
            match catch_unwind(AssertUnwindSafe(|| handler.on_quote(quote))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    metrics::record_handler_failure(HandlerFailure::Error);
                    tracing::warn!(consumer, symbol = %quote.symbol, error = %e, "Quote handler failed");
                }
                Err(_) => {
                    metrics::record_handler_failure(HandlerFailure::Panic);
                    tracing::error!(consumer, symbol = %quote.symbol, "Quote handler panicked");
                }
            }
        }
        metrics::record_dispatches(delivered);
    }
}

fn checked_symbol(symbol: impl Into<Symbol>) -> Result<Symbol, MultiplexerError> {
    let symbol = symbol.into();
    if symbol.is_empty() {
        return Err(MultiplexerError::EmptySymbol);
    }
    Ok(symbol)
}
