//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Feed**: frames received, decode failures, reconnects, connection state
//! - **Dispatch**: quotes applied to the price store and handler deliveries
//! - **Subscriptions**: symbols currently subscribed upstream
//! - **Analysis**: portfolio recomputations and their duration
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Without an
//! installed recorder every call here is a no-op, which keeps unit tests
//! independent of the exporter.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder, or return the existing handle.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Feed
    describe_counter!(
        "portfolio_stream_frames_received_total",
        "Total text frames received from the price feed"
    );
    describe_counter!(
        "portfolio_stream_decode_errors_total",
        "Total frames dropped because they could not be decoded"
    );
    describe_counter!(
        "portfolio_stream_reconnects_total",
        "Total price feed reconnection attempts"
    );
    describe_gauge!(
        "portfolio_stream_feed_connected",
        "1 while the price feed connection is open"
    );

    // Dispatch
    describe_counter!(
        "portfolio_stream_quotes_applied_total",
        "Total quotes written to the price store"
    );
    describe_counter!(
        "portfolio_stream_dispatches_total",
        "Total quote deliveries to subscribed handlers"
    );
    describe_counter!(
        "portfolio_stream_handler_failures_total",
        "Total handler invocations that failed or panicked"
    );

    // Subscriptions
    describe_gauge!(
        "portfolio_stream_subscribed_symbols",
        "Number of symbols subscribed upstream"
    );

    // Analysis
    describe_counter!(
        "portfolio_stream_recomputes_total",
        "Total portfolio analysis recomputations"
    );
    describe_histogram!(
        "portfolio_stream_recompute_seconds",
        "Time to recompute the portfolio analysis"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Source of a quote written to the price store.
#[derive(Debug, Clone, Copy)]
pub enum QuoteSource {
    /// Streaming feed.
    Stream,
    /// REST snapshot.
    Rest,
}

impl QuoteSource {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Rest => "rest",
        }
    }
}

/// How a handler invocation failed.
#[derive(Debug, Clone, Copy)]
pub enum HandlerFailure {
    /// Handler returned an error.
    Error,
    /// Handler panicked.
    Panic,
}

impl HandlerFailure {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Panic => "panic",
        }
    }
}

/// Record a text frame received from the feed.
pub fn record_frame_received() {
    counter!("portfolio_stream_frames_received_total").increment(1);
}

/// Record a frame that failed to decode.
pub fn record_decode_error() {
    counter!("portfolio_stream_decode_errors_total").increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect() {
    counter!("portfolio_stream_reconnects_total").increment(1);
}

/// Update the feed connection gauge.
pub fn set_feed_connected(connected: bool) {
    gauge!("portfolio_stream_feed_connected").set(if connected { 1.0 } else { 0.0 });
}

/// Record a quote written to the price store.
pub fn record_quote_applied(source: QuoteSource) {
    counter!(
        "portfolio_stream_quotes_applied_total",
        "source" => source.as_str()
    )
    .increment(1);
}

/// Record deliveries of one quote to its handlers.
pub fn record_dispatches(count: u64) {
    counter!("portfolio_stream_dispatches_total").increment(count);
}

/// Record a failed handler invocation.
pub fn record_handler_failure(failure: HandlerFailure) {
    counter!(
        "portfolio_stream_handler_failures_total",
        "kind" => failure.as_str()
    )
    .increment(1);
}

/// Update the subscribed symbol count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribed_symbols(count: usize) {
    gauge!("portfolio_stream_subscribed_symbols").set(count as f64);
}

/// Record a portfolio recomputation.
pub fn record_recompute(duration: Duration) {
    counter!("portfolio_stream_recomputes_total").increment(1);
    histogram!("portfolio_stream_recompute_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_source_as_str() {
        assert_eq!(QuoteSource::Stream.as_str(), "stream");
        assert_eq!(QuoteSource::Rest.as_str(), "rest");
    }

    #[test]
    fn handler_failure_as_str() {
        assert_eq!(HandlerFailure::Error.as_str(), "error");
        assert_eq!(HandlerFailure::Panic.as_str(), "panic");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received();
        record_dispatches(3);
        set_subscribed_symbols(2);
        record_recompute(Duration::from_millis(1));
    }
}
