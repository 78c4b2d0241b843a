//! Subscription Multiplexing Integration Tests
//!
//! Exercises the multiplexer against a scripted transport and the real JSON
//! codec: upstream deduplication, reconnect resubscription and dispatch.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal_macros::dec;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use portfolio_stream::application::ports::{
    FeedCommand, FeedEvent, PriceFeedTransport, TransportError,
};
use portfolio_stream::application::services::HandlerError;
use portfolio_stream::{
    ConnectionState, FeedCodec, PriceStore, Quote, SubscriptionHandle, SubscriptionMultiplexer,
    Symbol, handler_fn,
};

/// Transport that records commands and can be flipped between up and down.
struct ScriptedTransport {
    connected: AtomicBool,
    sent: Mutex<Vec<FeedCommand>>,
    state: watch::Sender<ConnectionState>,
}

impl ScriptedTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            state: watch::channel(ConnectionState::Connected).0,
        })
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        self.state.send_replace(if connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Reconnecting
        });
    }

    fn take(&self) -> Vec<FeedCommand> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl PriceFeedTransport for ScriptedTransport {
    fn connect(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn disconnect(&self) {
        self.set_connected(false);
    }

    fn send(&self, command: FeedCommand) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().push(command);
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

fn setup() -> (Arc<ScriptedTransport>, SubscriptionMultiplexer, PriceStore) {
    let transport = ScriptedTransport::new();
    let (mux, store) = SubscriptionMultiplexer::with_store(transport.clone(), Arc::new(FeedCodec::new()));
    (transport, mux, store)
}

fn sub(symbol: &str) -> FeedCommand {
    FeedCommand::Subscribe(Symbol::new(symbol))
}

fn unsub(symbol: &str) -> FeedCommand {
    FeedCommand::Unsubscribe(Symbol::new(symbol))
}

fn quote_frame(symbol: &str, price: &str) -> FeedEvent {
    FeedEvent::Message(format!(
        r#"{{"type":"quote","symbol":"{symbol}","currentPrice":"{price}"}}"#
    ))
}

fn counting_handler() -> (Arc<AtomicUsize>, Arc<dyn portfolio_stream::QuoteHandler>) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    let handler = handler_fn(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    (count, handler)
}

#[test]
fn two_consumers_share_one_upstream_subscription() {
    let (transport, mux, _store) = setup();
    let (count_a, handler_a) = counting_handler();
    let (count_b, handler_b) = counting_handler();
    let a = mux.register(handler_a);
    let b = mux.register(handler_b);

    let handle_a = mux.subscribe(a, "AAPL").unwrap();
    let _handle_b = mux.subscribe(b, "AAPL").unwrap();
    assert_eq!(transport.take(), vec![sub("AAPL")]);

    assert!(!mux.unsubscribe(&handle_a));
    assert!(transport.take().is_empty());

    mux.handle_event(quote_frame("AAPL", "190.10"));
    assert_eq!(count_a.load(Ordering::SeqCst), 0);
    assert_eq!(count_b.load(Ordering::SeqCst), 1);
}

#[test]
fn subscribe_then_unsubscribe_before_any_tick() {
    let (transport, mux, _store) = setup();
    let (count, handler) = counting_handler();

    let handle = mux.subscribe_with("MSFT", handler).unwrap();
    assert!(mux.unsubscribe(&handle));

    assert_eq!(transport.take(), vec![sub("MSFT"), unsub("MSFT")]);
    mux.handle_event(quote_frame("MSFT", "410"));
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(mux.stats().consumer_count, 0);
}

#[test]
fn reconnect_restores_only_live_subscriptions() {
    let (transport, mux, _store) = setup();
    let (_, handler) = counting_handler();
    let consumer = mux.register(handler);

    mux.subscribe(consumer, "AAPL").unwrap();
    let ko = mux.subscribe(consumer, "KO").unwrap();
    transport.take();

    transport.set_connected(false);
    mux.handle_event(FeedEvent::Disconnected);
    mux.unsubscribe(&ko);
    mux.subscribe(consumer, "PEP").unwrap();
    assert!(transport.take().is_empty());

    transport.set_connected(true);
    mux.handle_event(FeedEvent::Connected);

    let mut resent = transport.take();
    resent.sort_by(|a, b| a.symbol().cmp(b.symbol()));
    assert_eq!(resent, vec![sub("AAPL"), sub("PEP")]);
}

#[test]
fn failing_and_panicking_handlers_do_not_block_others() {
    let (_transport, mux, _store) = setup();
    let (count, good) = counting_handler();

    mux.subscribe_with("AAPL", handler_fn(|_| Err(HandlerError::Failed("nope".into()))))
        .unwrap();
    mux.subscribe_with("AAPL", handler_fn(|_| panic!("handler bug"))).unwrap();
    mux.subscribe_with("AAPL", good).unwrap();

    mux.handle_event(quote_frame("AAPL", "1"));
    mux.handle_event(quote_frame("AAPL", "2"));

    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn malformed_frames_leave_store_untouched() {
    let (_transport, mux, store) = setup();
    let (count, handler) = counting_handler();
    mux.subscribe_with("AAPL", handler).unwrap();

    mux.handle_event(FeedEvent::Message("garbage".into()));
    mux.handle_event(FeedEvent::Message(r#"{"type":"quote","symbol":"AAPL"}"#.into()));

    assert!(store.is_empty());
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn bad_element_in_batch_keeps_other_symbols() {
    let (_transport, mux, store) = setup();
    let (count, handler) = counting_handler();
    mux.subscribe_with("KO", handler).unwrap();

    mux.handle_event(FeedEvent::Message(
        r#"[{"type":"quote","symbol":"KO","currentPrice":"60"},
            {"type":"quote","symbol":"PEP","currentPrice":-1}]"#
            .into(),
    ));

    assert_eq!(store.get(&Symbol::new("KO")).unwrap().price, dec!(60));
    assert!(store.get(&Symbol::new("PEP")).is_none());
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn handler_can_unsubscribe_itself_during_dispatch() {
    let (transport, mux, _store) = setup();
    let mux = Arc::new(mux);
    let (other_count, other) = counting_handler();
    let _other = mux.subscribe_with("AAPL", other).unwrap();

    let deliveries = Arc::new(AtomicUsize::new(0));
    let own_handle: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
    let handler = {
        let mux = Arc::downgrade(&mux);
        let own = Arc::clone(&own_handle);
        let seen = Arc::clone(&deliveries);
        handler_fn(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            let handle = own.lock().take();
            if let (Some(mux), Some(handle)) = (mux.upgrade(), handle) {
                mux.unsubscribe(&handle);
            }
            Ok(())
        })
    };
    *own_handle.lock() = Some(mux.subscribe_with("AAPL", handler).unwrap());

    mux.handle_event(quote_frame("AAPL", "1"));
    mux.handle_event(quote_frame("AAPL", "2"));

    assert_eq!(deliveries.load(Ordering::SeqCst), 1);
    assert_eq!(other_count.load(Ordering::SeqCst), 2);
    assert_eq!(mux.stats().consumer_count, 1);
    assert_eq!(transport.take(), vec![sub("AAPL")]);
}

#[test]
fn unsubscribing_a_peer_mid_dispatch_allows_at_most_one_extra_tick() {
    let (transport, mux, _store) = setup();
    let mux = Arc::new(mux);
    let (peer_count, peer) = counting_handler();
    let peer_handle = Arc::new(Mutex::new(Some(mux.subscribe_with("KO", peer).unwrap())));

    let canceller = {
        let mux = Arc::downgrade(&mux);
        let peer_handle = Arc::clone(&peer_handle);
        handler_fn(move |_| {
            let handle = peer_handle.lock().take();
            if let (Some(mux), Some(handle)) = (mux.upgrade(), handle) {
                mux.unsubscribe(&handle);
            }
            Ok(())
        })
    };
    let _canceller = mux.subscribe_with("KO", canceller).unwrap();

    mux.handle_event(quote_frame("KO", "60"));
    let after_first = peer_count.load(Ordering::SeqCst);
    mux.handle_event(quote_frame("KO", "61"));

    assert!(after_first <= 1);
    assert_eq!(peer_count.load(Ordering::SeqCst), after_first);
    assert!(peer_handle.lock().is_none());
    assert_eq!(mux.stats().consumer_count, 1);
    assert_eq!(transport.take(), vec![sub("KO")]);
}

#[test]
fn quotes_for_unsubscribed_symbols_are_stored_not_dispatched() {
    let (_transport, mux, store) = setup();
    let (count, handler) = counting_handler();
    mux.subscribe_with("AAPL", handler).unwrap();

    mux.handle_event(quote_frame("TSLA", "250"));

    assert_eq!(store.get(&Symbol::new("TSLA")).unwrap().price, dec!(250));
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn run_loop_delivers_latest_price_to_channel_consumer() {
    let (_transport, mux, store) = setup();
    let mux = Arc::new(mux);
    let (quotes_tx, mut quotes_rx) = mpsc::channel::<Arc<Quote>>(8);
    mux.subscribe_with("KO", Arc::new(quotes_tx)).unwrap();

    let (events_tx, events_rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let runner = {
        let mux = Arc::clone(&mux);
        let cancel = cancel.clone();
        tokio::spawn(async move { mux.run(events_rx, cancel).await })
    };

    events_tx.send(FeedEvent::Connected).await.unwrap();
    events_tx
        .send(FeedEvent::Message(
            r#"[{"type":"quote","symbol":"KO","currentPrice":60.1},
                {"type":"quote","symbol":"KO","currentPrice":60.2}]"#
                .into(),
        ))
        .await
        .unwrap();

    let first = timeout(Duration::from_secs(1), quotes_rx.recv()).await.unwrap().unwrap();
    let second = timeout(Duration::from_secs(1), quotes_rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.price, dec!(60.1));
    assert_eq!(second.price, dec!(60.2));
    assert_eq!(store.get(&Symbol::new("KO")).unwrap().price, dec!(60.2));

    cancel.cancel();
    timeout(Duration::from_secs(1), runner).await.unwrap().unwrap();
}
