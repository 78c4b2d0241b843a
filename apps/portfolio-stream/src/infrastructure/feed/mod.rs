//! Streaming Price Feed
//!
//! WebSocket transport, wire codec and reconnection policy for the
//! market-data feed.
//!
//! # Components
//!
//! - [`client`]: connection loop implementing `PriceFeedTransport`
//! - [`codec`]: JSON frame decoding and command encoding
//! - [`messages`]: wire types
//! - [`reconnect`]: exponential backoff with jitter

pub mod client;
pub mod codec;
pub mod messages;
pub mod reconnect;

pub use client::{FeedClient, FeedClientConfig, FeedClientError};
pub use codec::FeedCodec;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
