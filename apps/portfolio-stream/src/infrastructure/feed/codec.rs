//! Price Feed Codec
//!
//! Decodes inbound JSON frames into quotes and encodes subscription
//! commands. A frame is either a single message object or an array of them;
//! an array yields the quotes of all its elements in order.
//!
//! A bad element inside an array or trade batch is logged, counted and
//! skipped. The frame fails only when none of its elements decode.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use super::messages::{
    PriceUpdateMessage, ServerErrorMessage, SubscriptionRequest, TradeBatchMessage, kind,
};
use crate::application::ports::{DecodeError, DecodedFrame, FeedCommand, FrameDecoder};
use crate::domain::streaming::{Quote, Symbol};
use crate::infrastructure::{metrics, timestamp};

/// JSON codec for the price feed.
#[derive(Debug, Default, Clone, Copy)]
pub struct FeedCodec;

impl FeedCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode a subscription command as a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, command: &FeedCommand) -> Result<String, serde_json::Error> {
        serde_json::to_string(&SubscriptionRequest::from(command))
    }

    fn decode_array(&self, values: Vec<Value>) -> Result<DecodedFrame, DecodeError> {
        let frames = keep_decoded(values.into_iter().map(|value| self.decode_value(value)))?;
        let mut quotes = Vec::new();
        let mut server_error = None;

        for frame in frames {
            match frame {
                DecodedFrame::Quotes(mut batch) => quotes.append(&mut batch),
                DecodedFrame::ServerError(msg) => {
                    server_error.get_or_insert(msg);
                }
                DecodedFrame::Control => {}
            }
        }

        Ok(if !quotes.is_empty() {
            DecodedFrame::Quotes(quotes)
        } else if let Some(msg) = server_error {
            DecodedFrame::ServerError(msg)
        } else {
            DecodedFrame::Control
        })
    }

    fn decode_value(&self, value: Value) -> Result<DecodedFrame, DecodeError> {
        let msg_type = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| DecodeError::UnknownType("<missing>".to_string()))?;

        match msg_type.as_str() {
            kind::QUOTE => {
                let msg: PriceUpdateMessage = serde_json::from_value(value)?;
                Ok(DecodedFrame::Quotes(vec![price_update_to_quote(msg)?]))
            }
            kind::TRADE => {
                let msg: TradeBatchMessage = serde_json::from_value(value)?;
                let quotes = keep_decoded(msg.data.into_iter().map(|trade| {
                    let timestamp = DateTime::from_timestamp_millis(trade.timestamp_ms)
                        .ok_or_else(|| invalid("t", trade.timestamp_ms.to_string()))?;
                    Ok(Quote::new(
                        checked_symbol(&trade.symbol)?,
                        checked_price(trade.price)?,
                        timestamp,
                    ))
                }))?;
                Ok(DecodedFrame::Quotes(quotes))
            }
            kind::PING => Ok(DecodedFrame::Control),
            kind::ERROR => {
                let msg: ServerErrorMessage = serde_json::from_value(value)?;
                Ok(DecodedFrame::ServerError(msg.msg))
            }
            other => Err(DecodeError::UnknownType(other.to_string())),
        }
    }
}

impl FrameDecoder for FeedCodec {
    fn decode(&self, frame: &str) -> Result<DecodedFrame, DecodeError> {
        let trimmed = frame.trim();

        if trimmed.starts_with('[') {
            let values: Vec<Value> = serde_json::from_str(trimmed)?;
            self.decode_array(values)
        } else if trimmed.starts_with('{') {
            let value: Value = serde_json::from_str(trimmed)?;
            self.decode_value(value)
        } else {
            Err(invalid(
                "frame",
                format!(
                    "expected JSON array or object, got: {}",
                    trimmed.chars().take(50).collect::<String>()
                ),
            ))
        }
    }
}

/// Collect the elements that decoded, skipping the rest.
///
/// Fails with the first error only when no element decoded.
fn keep_decoded<T>(
    results: impl IntoIterator<Item = Result<T, DecodeError>>,
) -> Result<Vec<T>, DecodeError> {
    let mut decoded = Vec::new();
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(item) => decoded.push(item),
            Err(e) => failures.push(e),
        }
    }

    if decoded.is_empty() {
        return failures.into_iter().next().map_or(Ok(decoded), Err);
    }
    for error in &failures {
        metrics::record_decode_error();
        tracing::warn!(error = %error, "Skipping undecodable element");
    }
    Ok(decoded)
}

fn price_update_to_quote(msg: PriceUpdateMessage) -> Result<Quote, DecodeError> {
    let timestamp = match msg.timestamp.as_deref() {
        Some(raw) => timestamp::parse(raw).ok_or_else(|| invalid("timestamp", raw.to_string()))?,
        None => Utc::now(),
    };

    Ok(
        Quote::new(checked_symbol(&msg.symbol)?, checked_price(msg.current_price)?, timestamp)
            .with_spread(msg.bid, msg.ask)
            .with_change(msg.change, msg.change_percent),
    )
}

fn checked_symbol(raw: &str) -> Result<Symbol, DecodeError> {
    let symbol = Symbol::new(raw);
    if symbol.is_empty() {
        return Err(invalid("symbol", "empty".to_string()));
    }
    Ok(symbol)
}

fn checked_price(price: Decimal) -> Result<Decimal, DecodeError> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(invalid("price", price.to_string()));
    }
    Ok(price)
}

fn invalid(field: &'static str, reason: String) -> DecodeError {
    DecodeError::InvalidField { field, reason }
}
