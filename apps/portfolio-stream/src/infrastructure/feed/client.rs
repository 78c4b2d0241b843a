//! Price Feed WebSocket Client
//!
//! Maintains the single streaming connection to the market-data endpoint.
//!
//! # Lifecycle
//!
//! `connect` spawns a connection loop that dials the endpoint, emits
//! [`FeedEvent::Connected`], and forwards every text frame as
//! [`FeedEvent::Message`]. On any failure it emits `Disconnected`, waits
//! out the backoff, and dials again. Commands sent while the socket is down
//! are rejected with [`TransportError::NotConnected`]; the multiplexer
//! re-subscribes everything when the next `Connected` arrives.
//!
//! # Sessions
//!
//! Every spawned loop carries a generation number. Only the loop of the
//! current generation may install or clear the command channel and publish
//! connection state, so a loop still winding down after `disconnect` cannot
//! disturb the loop started by a following `connect`.
//!
//! # Keep-alive
//!
//! A WebSocket ping goes out every `ping_interval`. If nothing at all has
//! been received for `idle_timeout`, the connection is treated as dead.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::codec::FeedCodec;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{FeedCommand, FeedEvent, PriceFeedTransport, TransportError};
use crate::domain::streaming::ConnectionState;
use crate::infrastructure::config::FeedSettings;

// =============================================================================
// Error Type
// =============================================================================

/// Errors that end one connection attempt.
#[derive(Debug, thiserror::Error)]
pub enum FeedClientError {
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Command could not be encoded.
    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),

    /// Nothing received within the idle timeout.
    #[error("no traffic for {0:?}")]
    IdleTimeout(Duration),

    /// Server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the feed client.
#[derive(Clone)]
pub struct FeedClientConfig {
    /// WebSocket URL.
    pub url: String,
    /// API token, sent as the `token` query parameter.
    pub token: Option<String>,
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Silence after which the connection is dropped.
    pub idle_timeout: Duration,
    /// Reconnection backoff.
    pub reconnect: ReconnectConfig,
}

impl fmt::Debug for FeedClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedClientConfig")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("ping_interval", &self.ping_interval)
            .field("idle_timeout", &self.idle_timeout)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

impl FeedClientConfig {
    /// Configuration with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            url: url.into(),
            token,
            ping_interval: Duration::from_secs(20),
            idle_timeout: Duration::from_secs(60),
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Build from feed settings.
    #[must_use]
    pub fn from_settings(settings: &FeedSettings) -> Self {
        Self {
            url: settings.url.clone(),
            token: settings.token.clone(),
            ping_interval: settings.ping_interval,
            idle_timeout: settings.idle_timeout,
            reconnect: ReconnectConfig::from_settings(settings),
        }
    }

    /// URL to dial, including the token.
    #[must_use]
    pub fn endpoint(&self) -> String {
        match &self.token {
            Some(token) => {
                let separator = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{separator}token={token}", self.url)
            }
            None => self.url.clone(),
        }
    }
}

// =============================================================================
// Feed Client
// =============================================================================

struct Session {
    generation: u64,
    commands: mpsc::UnboundedSender<FeedCommand>,
}

struct Shared {
    config: FeedClientConfig,
    codec: FeedCodec,
    events: mpsc::Sender<FeedEvent>,
    state: watch::Sender<ConnectionState>,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// WebSocket implementation of [`PriceFeedTransport`].
pub struct FeedClient {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    running: Mutex<Option<Running>>,
}

impl fmt::Debug for FeedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedClient")
            .field("config", &self.shared.config)
            .field("state", &*self.shared.state.borrow())
            .finish_non_exhaustive()
    }
}

impl FeedClient {
    /// Create a client that reports to `events`.
    ///
    /// Cancelling `shutdown` stops any running connection loop.
    #[must_use]
    pub fn new(
        config: FeedClientConfig,
        events: mpsc::Sender<FeedEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                codec: FeedCodec::new(),
                events,
                state: watch::channel(ConnectionState::Disconnected).0,
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
            shutdown,
            running: Mutex::new(None),
        }
    }
}

impl PriceFeedTransport for FeedClient {
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    fn connect(&self) -> watch::Receiver<ConnectionState> {
        let mut running = self.running.lock();
        let active = running
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished() && !r.cancel.is_cancelled());

        if !active {
            let cancel = self.shutdown.child_token();
            let generation = self.shared.advance();
            self.shared.state.send_replace(ConnectionState::Connecting);
            let handle = tokio::spawn(Arc::clone(&self.shared).run(cancel.clone(), generation));
            *running = Some(Running { cancel, handle });
        }

        self.shared.state.subscribe()
    }

    fn disconnect(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.cancel.cancel();
        self.shared.advance();
        self.shared.session.lock().take();
        self.shared.state.send_replace(ConnectionState::Disconnected);
        tracing::info!("Price feed disconnect requested");
    }

    fn send(&self, command: FeedCommand) -> Result<(), TransportError> {
        let session = self.shared.session.lock();
        let session = session.as_ref().ok_or(TransportError::NotConnected)?;
        session.commands.send(command).map_err(|_| TransportError::Closed)
    }

    fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }
}

impl Shared {
    async fn run(self: Arc<Self>, cancel: CancellationToken, generation: u64) {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        while !cancel.is_cancelled() {
            let error = match self.connect_and_run(&cancel, &mut policy, generation).await {
                Ok(()) => break,
                Err(e) => e,
            };

            let was_connected = self.end_session(generation);
            tracing::warn!(error = %error, "Price feed connection error");
            self.emit(FeedEvent::Error(error.to_string())).await;
            if was_connected {
                self.emit(FeedEvent::Disconnected).await;
            }

            let Some(delay) = policy.next_delay() else {
                tracing::error!(
                    attempts = policy.attempt_count(),
                    "Maximum price feed reconnection attempts exceeded"
                );
                break;
            };

            let attempt = policy.attempt_count();
            self.publish(generation, ConnectionState::Reconnecting);
            tracing::info!(attempt, delay_ms = delay.as_millis(), "Reconnecting to price feed");
            self.emit(FeedEvent::Reconnecting { attempt }).await;

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        if self.end_session(generation) {
            self.emit(FeedEvent::Disconnected).await;
        }
        self.publish(generation, ConnectionState::Disconnected);
        tracing::info!(generation, "Price feed connection loop stopped");
    }

    async fn connect_and_run(
        &self,
        cancel: &CancellationToken,
        policy: &mut ReconnectPolicy,
        generation: u64,
    ) -> Result<(), FeedClientError> {
        tracing::info!(url = %self.config.url, "Connecting to price feed");

        let connected = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            result = tokio_tungstenite::connect_async(self.config.endpoint()) => result,
        };
        let (ws_stream, _response) = connected?;
        let (mut write, mut read) = ws_stream.split();

        let (command_tx, mut commands) = mpsc::unbounded_channel();
        if !self.begin_session(generation, command_tx) {
            tracing::debug!(generation, "Connection loop superseded, closing socket");
            let _ = write.send(Message::Close(None)).await;
            return Ok(());
        }
        policy.reset();
        self.publish(generation, ConnectionState::Connected);
        tracing::info!("Price feed connected");
        self.emit(FeedEvent::Connected).await;

        let ping_interval = self.config.ping_interval;
        let mut ping = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                Some(command) = commands.recv() => {
                    let text = self.codec.encode(&command)?;
                    tracing::debug!(?command, "Sending feed command");
                    write.send(Message::Text(text.into())).await?;
                }
                _ = ping.tick() => {
                    if last_seen.elapsed() >= self.config.idle_timeout {
                        return Err(FeedClientError::IdleTimeout(self.config.idle_timeout));
                    }
                    write.send(Message::Ping(Vec::new().into())).await?;
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            last_seen = Instant::now();
                            self.emit(FeedEvent::Message(text.as_str().to_owned())).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            last_seen = Instant::now();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Server sent close frame");
                            return Err(FeedClientError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {
                            last_seen = Instant::now();
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Err(FeedClientError::ConnectionClosed),
                    }
                }
            }
        }
    }

    /// Start a new generation, retiring whichever loop is running.
    fn advance(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Install the command channel if `generation` is still current.
    fn begin_session(&self, generation: u64, commands: mpsc::UnboundedSender<FeedCommand>) -> bool {
        let mut session = self.session.lock();
        if !self.is_current(generation) {
            return false;
        }
        *session = Some(Session {
            generation,
            commands,
        });
        true
    }

    /// Drop this generation's command channel. Returns whether it was open.
    fn end_session(&self, generation: u64) -> bool {
        let mut session = self.session.lock();
        if session.as_ref().is_some_and(|s| s.generation == generation) {
            session.take();
            true
        } else {
            false
        }
    }

    fn publish(&self, generation: u64, state: ConnectionState) {
        if self.is_current(generation) {
            self.state.send_replace(state);
        }
    }

    async fn emit(&self, event: FeedEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("Feed event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::streaming::Symbol;

    fn client() -> FeedClient {
        let (tx, _rx) = mpsc::channel(8);
        FeedClient::new(
            FeedClientConfig::new("ws://127.0.0.1:9", Some("secret".into())),
            tx,
            CancellationToken::new(),
        )
    }

    #[test]
    fn endpoint_appends_token() {
        let config = FeedClientConfig::new("wss://ws.finnhub.io", Some("abc".into()));
        assert_eq!(config.endpoint(), "wss://ws.finnhub.io?token=abc");

        let config = FeedClientConfig::new("wss://feed.example/ws?v=2", Some("abc".into()));
        assert_eq!(config.endpoint(), "wss://feed.example/ws?v=2&token=abc");

        let config = FeedClientConfig::new("ws://localhost:8080/ws", None);
        assert_eq!(config.endpoint(), "ws://localhost:8080/ws");
    }

    #[test]
    fn debug_redacts_token() {
        let config = FeedClientConfig::new("wss://ws.finnhub.io", Some("super-secret".into()));
        let debug = format!("{config:?}");

        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn send_before_connect_is_rejected() {
        let client = client();

        assert_eq!(
            client.send(FeedCommand::Subscribe(Symbol::new("AAPL"))),
            Err(TransportError::NotConnected)
        );
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn disconnect_without_connect_is_noop() {
        let client = client();
        client.disconnect();
        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn retired_generation_cannot_touch_current_session() {
        let client = client();
        let retired = client.shared.advance();
        let current = client.shared.advance();
        let (retired_tx, _retired_rx) = mpsc::unbounded_channel();
        let (current_tx, mut current_rx) = mpsc::unbounded_channel();

        assert!(!client.shared.begin_session(retired, retired_tx));
        assert!(client.shared.begin_session(current, current_tx));
        client.shared.publish(current, ConnectionState::Connected);

        assert!(!client.shared.end_session(retired));
        client.shared.publish(retired, ConnectionState::Disconnected);

        assert_eq!(client.state(), ConnectionState::Connected);
        client
            .send(FeedCommand::Subscribe(Symbol::new("KO")))
            .unwrap();
        assert_eq!(
            current_rx.try_recv().unwrap(),
            FeedCommand::Subscribe(Symbol::new("KO"))
        );
        assert!(client.shared.end_session(current));
    }

    #[tokio::test]
    async fn connect_twice_reuses_loop() {
        let client = client();

        let _first = client.connect();
        let _second = client.connect();

        assert!(client.running.lock().is_some());
        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
