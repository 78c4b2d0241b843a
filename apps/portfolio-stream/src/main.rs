//! Portfolio Stream Binary
//!
//! Starts the live portfolio dashboard service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin portfolio-stream
//! ```
//!
//! # Environment Variables
//!
//! - `FEED_URL`: price feed WebSocket URL (default: wss://ws.finnhub.io)
//! - `FEED_TOKEN`: price feed API token
//! - `BACKEND_URL`: portfolio backend base URL (default: <http://localhost:8080>)
//! - `DASHBOARD_USER_ID`: user whose portfolio is tracked (default: 1)
//! - `PORTFOLIO_STREAM_HEALTH_PORT`: status HTTP port (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `RUST_LOG`: Log filter (default: portfolio_stream=info)

use std::sync::Arc;
use std::time::Duration;

use portfolio_stream::application::ports::PriceFeedTransport;
use portfolio_stream::infrastructure::telemetry;
use portfolio_stream::{
    BackendClient, DashboardOrchestrator, DashboardServices, FeedClient, FeedClientConfig,
    FeedCodec, HealthServer, HealthServerState, PortfolioAggregator, ServiceConfig,
    SubscriptionMultiplexer, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Time allowed for background tasks to finish after shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting portfolio stream");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = ServiceConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Price feed and multiplexer
    let (events_tx, events_rx) = mpsc::channel(config.feed.event_capacity);
    let feed = Arc::new(FeedClient::new(
        FeedClientConfig::from_settings(&config.feed),
        events_tx,
        shutdown_token.clone(),
    ));
    let (multiplexer, store) =
        SubscriptionMultiplexer::with_store(feed.clone(), Arc::new(FeedCodec::new()));
    let multiplexer = Arc::new(multiplexer);

    let mux = Arc::clone(&multiplexer);
    let mux_cancel = shutdown_token.clone();
    let mux_task = tokio::spawn(async move { mux.run(events_rx, mux_cancel).await });

    let feed_state = feed.connect();

    // Dashboard
    let backend = Arc::new(BackendClient::new(&config.backend)?);
    let services = DashboardServices {
        portfolio: backend.clone(),
        account: backend.clone(),
        quotes: backend,
    };
    let orchestrator = Arc::new(DashboardOrchestrator::new(
        config.dashboard.user_id,
        services,
        Arc::clone(&multiplexer),
        store,
        PortfolioAggregator::new(config.dashboard.event_window),
    ));

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        feed_state,
        orchestrator.state(),
        Arc::clone(&multiplexer),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let dashboard = Arc::clone(&orchestrator);
    let dashboard_cancel = shutdown_token.clone();
    let dashboard_task = tokio::spawn(async move {
        if let Err(e) = dashboard.load().await {
            tracing::error!(error = %e, "Dashboard unavailable");
        }
        dashboard.run(dashboard_cancel).await;
    });

    tracing::info!("Portfolio stream ready");

    await_shutdown(&shutdown_token).await;
    feed.disconnect();

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = tokio::join!(mux_task, dashboard_task, health_task);
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out, exiting anyway"
        );
    }

    tracing::info!("Portfolio stream stopped");
    Ok(())
}

/// Load .env from the working directory or the nearest ancestor that has one.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ServiceConfig) {
    tracing::info!(
        feed_url = %config.feed.url,
        backend_url = %config.backend.base_url,
        user = %config.dashboard.user_id,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(feed = ?config.feed, "Feed settings");
}

/// Wait for shutdown signal (SIGTERM or SIGINT), then cancel `shutdown_token`.
async fn await_shutdown(shutdown_token: &CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
