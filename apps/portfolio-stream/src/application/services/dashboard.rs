//! Dashboard Orchestrator
//!
//! Loads holdings and account figures, keeps the multiplexer subscribed to
//! exactly the held symbols, and republishes the portfolio analysis whenever
//! holdings change or a held symbol ticks.
//!
//! # States
//!
//! ```text
//! Loading ──(both fetches ok)──► Ready ◄──(tick / add / remove)──┐
//!    │                             └──────────────────────────────┘
//!    └──(either fetch fails)──► Failed
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;

use super::multiplexer::{MultiplexerError, SubscriptionMultiplexer, handler_fn};
use super::price_store::PriceStore;
use crate::application::ports::{AccountService, PortfolioService, QuoteService, ServiceError};
use crate::domain::portfolio::{
    AccountSummary, Holding, HoldingId, NewHolding, PortfolioAggregator, PortfolioAnalysis, UserId,
};
use crate::domain::streaming::Symbol;
use crate::domain::subscription::ConsumerId;
use crate::infrastructure::metrics;

// =============================================================================
// Types
// =============================================================================

/// Backend collaborators.
#[derive(Clone)]
pub struct DashboardServices {
    /// Holdings source.
    pub portfolio: Arc<dyn PortfolioService>,
    /// Account figures source.
    pub account: Arc<dyn AccountService>,
    /// REST quotes for seeding prices.
    pub quotes: Arc<dyn QuoteService>,
}

/// Everything the dashboard renders once loaded.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    /// Backend account figures.
    pub account: AccountSummary,
    /// Derived portfolio figures.
    pub analysis: Arc<PortfolioAnalysis>,
}

/// Published dashboard state.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum DashboardState {
    /// Initial fetches in flight.
    #[default]
    Loading,
    /// Data available.
    Ready(DashboardView),
    /// An initial fetch failed.
    Failed {
        /// Single consolidated reason.
        message: String,
    },
}

impl DashboardState {
    /// Stable label for health output.
    #[must_use]
    pub const fn phase(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Ready(_) => "ready",
            Self::Failed { .. } => "failed",
        }
    }

    /// Whether data is available.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Errors from dashboard operations.
#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    /// Initial holdings or account fetch failed.
    #[error("failed to load dashboard: {0}")]
    Load(#[source] ServiceError),
    /// Adding or removing a holding failed.
    #[error("portfolio update failed: {0}")]
    Mutation(#[source] ServiceError),
    /// Holdings could not be re-fetched after an update.
    #[error("failed to refresh holdings: {0}")]
    Refresh(#[source] ServiceError),
    /// Subscription bookkeeping failed.
    #[error(transparent)]
    Subscription(#[from] MultiplexerError),
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Drives one user's dashboard.
pub struct DashboardOrchestrator {
    user: UserId,
    services: DashboardServices,
    multiplexer: Arc<SubscriptionMultiplexer>,
    store: PriceStore,
    aggregator: PortfolioAggregator,
    consumer: ConsumerId,
    changed: Arc<Notify>,
    holdings: RwLock<Vec<Holding>>,
    account: RwLock<Option<AccountSummary>>,
    state: watch::Sender<DashboardState>,
}

impl std::fmt::Debug for DashboardOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DashboardOrchestrator")
            .field("user", &self.user)
            .field("consumer", &self.consumer)
            .field("phase", &self.state.borrow().phase())
            .finish_non_exhaustive()
    }
}

impl DashboardOrchestrator {
    /// Create an orchestrator and register its price consumer.
    #[must_use]
    pub fn new(
        user: UserId,
        services: DashboardServices,
        multiplexer: Arc<SubscriptionMultiplexer>,
        store: PriceStore,
        aggregator: PortfolioAggregator,
    ) -> Self {
        let changed = Arc::new(Notify::new());
        let signal = Arc::clone(&changed);
        let consumer = multiplexer.register(handler_fn(move |_| {
            signal.notify_one();
            Ok(())
        }));

        Self {
            user,
            services,
            multiplexer,
            store,
            aggregator,
            consumer,
            changed,
            holdings: RwLock::new(Vec::new()),
            account: RwLock::new(None),
            state: watch::channel(DashboardState::Loading).0,
        }
    }

    /// Subscribe to state changes.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<DashboardState> {
        self.state.subscribe()
    }

    /// Current state.
    #[must_use]
    pub fn current(&self) -> DashboardState {
        self.state.borrow().clone()
    }

    /// Holdings as last fetched.
    #[must_use]
    pub fn holdings(&self) -> Vec<Holding> {
        self.holdings.read().clone()
    }

    /// Fetch holdings and account figures, then publish the first analysis.
    ///
    /// # Errors
    ///
    /// Returns [`DashboardError::Load`] if either fetch fails; the published
    /// state becomes `Failed` with the same message.
    pub async fn load(&self) -> Result<(), DashboardError> {
        self.state.send_replace(DashboardState::Loading);

        let fetched = tokio::try_join!(
            self.services.portfolio.fetch_holdings(self.user),
            self.services.account.fetch_account_info(self.user),
        );
        let (holdings, account) = match fetched {
            Ok(data) => data,
            Err(e) => {
                let error = DashboardError::Load(e);
                tracing::error!(user = %self.user, error = %error, "Dashboard load failed");
                *self.account.write() = None;
                self.state.send_replace(DashboardState::Failed {
                    message: error.to_string(),
                });
                return Err(error);
            }
        };

        tracing::info!(user = %self.user, holdings = holdings.len(), "Dashboard data loaded");
        *self.holdings.write() = holdings;
        *self.account.write() = Some(account);

        self.sync_subscriptions().await?;
        self.recompute();
        Ok(())
    }

    /// Buy `quantity` shares of `symbol` at `buy_price`.
    ///
    /// # Errors
    ///
    /// On failure the last published state is kept.
    pub async fn add_holding(
        &self,
        symbol: impl Into<Symbol>,
        quantity: Decimal,
        buy_price: Decimal,
    ) -> Result<Holding, DashboardError> {
        let request = NewHolding {
            symbol: symbol.into(),
            quantity,
            buy_price,
        };
        let holding = self
            .services
            .portfolio
            .add_holding(self.user, request)
            .await
            .map_err(DashboardError::Mutation)?;

        tracing::info!(id = %holding.id, symbol = %holding.symbol, "Holding added");
        self.refresh_holdings().await?;
        Ok(holding)
    }

    /// Close the holding with `id`.
    ///
    /// # Errors
    ///
    /// On failure the last published state is kept.
    pub async fn remove_holding(&self, id: HoldingId) -> Result<(), DashboardError> {
        self.services
            .portfolio
            .remove_holding(id)
            .await
            .map_err(DashboardError::Mutation)?;

        tracing::info!(%id, "Holding removed");
        self.refresh_holdings().await
    }

    /// Recompute on every price change for a held symbol until cancelled.
    ///
    /// Ticks arriving during a recompute collapse into one more pass.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Dashboard orchestrator cancelled");
                    return;
                }
                () = self.changed.notified() => self.recompute(),
            }
        }
    }

    /// Rebuild the analysis from current holdings and prices.
    ///
    /// Does nothing until account figures have been loaded.
    pub fn recompute(&self) {
        let Some(account) = self.account.read().clone() else {
            return;
        };

        let started = Instant::now();
        let snapshot = self.store.snapshot();
        let analysis = self.aggregator.analyze(&self.holdings.read(), &snapshot);
        metrics::record_recompute(started.elapsed());

        tracing::trace!(
            total_value = %analysis.total_current_value,
            stale = analysis.stale_count(),
            "Portfolio recomputed"
        );
        self.state.send_replace(DashboardState::Ready(DashboardView {
            account,
            analysis: Arc::new(analysis),
        }));
    }

    async fn refresh_holdings(&self) -> Result<(), DashboardError> {
        let holdings = self
            .services
            .portfolio
            .fetch_holdings(self.user)
            .await
            .map_err(DashboardError::Refresh)?;
        *self.holdings.write() = holdings;

        self.sync_subscriptions().await?;
        self.recompute();
        Ok(())
    }

    /// Subscribe to held symbols only, then seed any price not yet known.
    async fn sync_subscriptions(&self) -> Result<(), DashboardError> {
        let symbols: BTreeSet<Symbol> =
            self.holdings.read().iter().map(|h| h.symbol.clone()).collect();
        self.multiplexer
            .retain(self.consumer, symbols.iter().cloned())?;

        let missing: Vec<Symbol> = symbols
            .into_iter()
            .filter(|s| !self.store.contains(s))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let quotes = &self.services.quotes;
        let fetched = join_all(missing.iter().map(|symbol| quotes.fetch_quote(symbol))).await;
        for (symbol, result) in missing.iter().zip(fetched) {
            match result {
                Ok(quote) => {
                    self.multiplexer.apply_quote(quote);
                }
                Err(e) => tracing::warn!(symbol = %symbol, error = %e, "Could not seed quote"),
            }
        }
        Ok(())
    }
}

impl Drop for DashboardOrchestrator {
    fn drop(&mut self) {
        self.multiplexer.deregister(self.consumer);
    }
}
