//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `PriceFeedTransport`: the single streaming connection to the price feed
//! - `FrameDecoder`: turns raw feed frames into quotes
//! - `PortfolioService` / `AccountService` / `QuoteService`: REST backend

use async_trait::async_trait;
use tokio::sync::watch;

use crate::domain::portfolio::{AccountSummary, Holding, HoldingId, NewHolding, UserId};
use crate::domain::streaming::{ConnectionState, Quote, Symbol};

// =============================================================================
// Price Feed Transport
// =============================================================================

/// Outbound request to the price feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeedCommand {
    /// Start streaming a symbol.
    Subscribe(Symbol),
    /// Stop streaming a symbol.
    Unsubscribe(Symbol),
}

impl FeedCommand {
    /// Symbol the command refers to.
    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        match self {
            Self::Subscribe(symbol) | Self::Unsubscribe(symbol) => symbol,
        }
    }
}

/// Event emitted by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Connection established; subscriptions must be (re)issued.
    Connected,
    /// Connection lost.
    Disconnected,
    /// Waiting before another connection attempt.
    Reconnecting {
        /// Reconnection attempt number.
        attempt: u32,
    },
    /// Raw text frame from the feed.
    Message(String),
    /// Transport-level error; the transport recovers on its own.
    Error(String),
}

/// Errors returned to callers of the transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No open connection to send on.
    #[error("price feed not connected")]
    NotConnected,
    /// The connection task has gone away.
    #[error("price feed connection task closed")]
    Closed,
}

/// The one shared streaming connection.
///
/// Reconnection is handled inside the implementation and surfaces only as
/// [`FeedEvent`]s on the channel supplied at construction.
pub trait PriceFeedTransport: Send + Sync {
    /// Start the connection loop if it is not already running.
    ///
    /// The returned receiver reflects the current state immediately, so a
    /// caller attaching to an open connection sees `Connected` at once.
    fn connect(&self) -> watch::Receiver<ConnectionState>;

    /// Stop the connection loop. Calling it again is a no-op.
    fn disconnect(&self);

    /// Send a command over the open connection.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] while the socket is down.
    fn send(&self, command: FeedCommand) -> Result<(), TransportError>;

    /// Current connection state.
    fn state(&self) -> ConnectionState;
}

// =============================================================================
// Frame Decoding
// =============================================================================

/// Meaning of one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedFrame {
    /// One or more price updates.
    Quotes(Vec<Quote>),
    /// Keep-alive or acknowledgement with no payload.
    Control,
    /// Error reported by the feed server.
    ServerError(String),
}

/// Errors decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Not valid JSON or wrong shape.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    /// Message type not understood.
    #[error("unknown message type: {0}")]
    UnknownType(String),
    /// A field failed validation.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Offending field.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

/// Decodes raw feed frames.
pub trait FrameDecoder: Send + Sync {
    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] when the frame cannot be interpreted.
    fn decode(&self, frame: &str) -> Result<DecodedFrame, DecodeError>;
}

// =============================================================================
// Backend Services
// =============================================================================

/// Errors from the REST backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    /// Request could not be sent or timed out.
    #[error("service unavailable: {0}")]
    Unavailable(String),
    /// Non-success HTTP status.
    #[error("service returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },
    /// Response body could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Holdings owned by the portfolio service.
#[async_trait]
pub trait PortfolioService: Send + Sync {
    /// All holdings of a user.
    async fn fetch_holdings(&self, user: UserId) -> Result<Vec<Holding>, ServiceError>;

    /// Open a new position.
    async fn add_holding(&self, user: UserId, holding: NewHolding) -> Result<Holding, ServiceError>;

    /// Close a position.
    async fn remove_holding(&self, id: HoldingId) -> Result<(), ServiceError>;
}

/// Account figures computed by the backend.
#[async_trait]
pub trait AccountService: Send + Sync {
    /// Summary for a user.
    async fn fetch_account_info(&self, user: UserId) -> Result<AccountSummary, ServiceError>;
}

/// Point-in-time quotes over REST.
#[async_trait]
pub trait QuoteService: Send + Sync {
    /// Latest quote for a symbol.
    async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, ServiceError>;
}
