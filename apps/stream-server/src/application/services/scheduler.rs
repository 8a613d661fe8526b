//! Symbol Stream Scheduler
//!
//! Runs one periodic poll task per subscribed symbol, plus a singleton
//! market overview task and a portfolio feed task. Tasks push
//! [`StreamEvent`]s onto a channel consumed by the dispatcher.
//!
//! # Task Lifecycle
//!
//! ```text
//! stopped ──start(symbol)──► running ──stop(symbol)──► stopped
//!                              │
//!                              └─ tick: poll (bounded by timeout) → emit | log + skip
//! ```
//!
//! Polls for one symbol never overlap: the next tick is awaited only after
//! the current poll has finished. A failed or timed-out poll skips the
//! tick; it never ends the task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::ports::QuoteSource;
use crate::application::services::portfolio::PortfolioSimulator;
use crate::domain::connection::ConnectionRegistry;
use crate::domain::market::{IndexLevel, MARKET_INDICES, MarketIndex, Symbol};
use crate::domain::streaming::StreamEvent;
use crate::infrastructure::metrics::{self, PollKind, PollOutcome};

// =============================================================================
// Configuration
// =============================================================================

/// Poll cadences and the upstream timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Per-symbol poll period.
    pub stock_interval: Duration,
    /// Market overview poll period.
    pub market_interval: Duration,
    /// Portfolio snapshot period.
    pub portfolio_interval: Duration,
    /// Bound on each upstream call.
    pub upstream_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stock_interval: Duration::from_millis(2_000),
            market_interval: Duration::from_millis(5_000),
            portfolio_interval: Duration::from_millis(10_000),
            upstream_timeout: Duration::from_millis(10_000),
        }
    }
}

// =============================================================================
// Stream Task Handle
// =============================================================================

#[derive(Debug)]
struct StreamTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl StreamTask {
    fn stop(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Shared inputs of every poll task.
#[derive(Clone)]
struct PollContext {
    source: Arc<dyn QuoteSource>,
    events: mpsc::Sender<StreamEvent>,
    upstream_timeout: Duration,
}

// =============================================================================
// Scheduler
// =============================================================================

/// Owns every running stream task.
pub struct StreamScheduler {
    context: PollContext,
    config: SchedulerConfig,
    shutdown: CancellationToken,
    symbols: Mutex<HashMap<Symbol, StreamTask>>,
    market: Mutex<Option<StreamTask>>,
    portfolio: Mutex<Option<StreamTask>>,
}

impl std::fmt::Debug for StreamScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamScheduler")
            .field("config", &self.config)
            .field("active_symbols", &self.symbols.lock().len())
            .finish_non_exhaustive()
    }
}

impl StreamScheduler {
    /// Create a scheduler. Tasks are children of `shutdown`.
    #[must_use]
    pub fn new(
        source: Arc<dyn QuoteSource>,
        events: mpsc::Sender<StreamEvent>,
        config: SchedulerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            context: PollContext {
                source,
                events,
                upstream_timeout: config.upstream_timeout,
            },
            config,
            shutdown,
            symbols: Mutex::new(HashMap::new()),
            market: Mutex::new(None),
            portfolio: Mutex::new(None),
        }
    }

    /// Configured cadences.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Start polling a symbol. No-op if it is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, symbol: &Symbol) -> bool {
        let mut symbols = self.symbols.lock();
        if symbols.contains_key(symbol) {
            return false;
        }

        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(run_symbol_stream(
            self.context.clone(),
            symbol.clone(),
            self.config.stock_interval,
            cancel.clone(),
        ));
        symbols.insert(symbol.clone(), StreamTask { cancel, handle });
        metrics::set_active_streams(symbols.len());

        tracing::info!(
            symbol = %symbol,
            interval = ?self.config.stock_interval,
            "Symbol stream started"
        );
        true
    }

    /// Stop polling a symbol. The task is cancelled before this returns.
    pub fn stop(&self, symbol: &Symbol) -> bool {
        let mut symbols = self.symbols.lock();
        let Some(task) = symbols.remove(symbol) else {
            return false;
        };

        task.stop();
        metrics::set_active_streams(symbols.len());

        tracing::info!(symbol = %symbol, "Symbol stream stopped");
        true
    }

    /// Start the market overview task. No-op if it is already running.
    pub fn start_market_overview(&self) -> bool {
        let mut market = self.market.lock();
        if market.is_some() {
            return false;
        }

        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(run_market_overview(
            self.context.clone(),
            self.config.market_interval,
            cancel.clone(),
        ));
        *market = Some(StreamTask { cancel, handle });

        tracing::info!(
            interval = ?self.config.market_interval,
            "Market overview stream started"
        );
        true
    }

    /// Start the portfolio feed. Snapshots are only generated while the
    /// registry reports at least one portfolio subscriber.
    pub fn start_portfolio_feed(
        &self,
        portfolio: Arc<PortfolioSimulator>,
        registry: Arc<ConnectionRegistry>,
    ) -> bool {
        let mut slot = self.portfolio.lock();
        if slot.is_some() {
            return false;
        }

        let cancel = self.shutdown.child_token();
        let handle = tokio::spawn(run_portfolio_feed(
            portfolio,
            registry,
            self.context.events.clone(),
            self.config.portfolio_interval,
            cancel.clone(),
        ));
        *slot = Some(StreamTask { cancel, handle });

        tracing::info!(
            interval = ?self.config.portfolio_interval,
            "Portfolio feed started"
        );
        true
    }

    /// Whether a symbol currently has a running task.
    #[must_use]
    pub fn is_running(&self, symbol: &Symbol) -> bool {
        self.symbols.lock().contains_key(symbol)
    }

    /// Symbols with running tasks.
    #[must_use]
    pub fn active_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<_> = self.symbols.lock().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Observability snapshot.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let active_symbols: Vec<String> = self
            .active_symbols()
            .into_iter()
            .map(String::from)
            .collect();

        SchedulerStats {
            stream_count: active_symbols.len(),
            active_symbols,
            market_overview_running: self.market.lock().is_some(),
            portfolio_feed_running: self.portfolio.lock().is_some(),
        }
    }

    /// Stop every task, the market overview included.
    pub fn shutdown(&self) {
        let symbols: Vec<_> = self.symbols.lock().drain().collect();
        let stopped = symbols.len();
        for (_, task) in symbols {
            task.stop();
        }
        if let Some(task) = self.market.lock().take() {
            task.stop();
        }
        if let Some(task) = self.portfolio.lock().take() {
            task.stop();
        }
        metrics::set_active_streams(0);

        tracing::info!(symbol_streams = stopped, "Stream scheduler stopped");
    }
}

impl Drop for StreamScheduler {
    fn drop(&mut self) {
        for (_, task) in self.symbols.get_mut().drain() {
            task.stop();
        }
        if let Some(task) = self.market.get_mut().take() {
            task.stop();
        }
        if let Some(task) = self.portfolio.get_mut().take() {
            task.stop();
        }
    }
}

/// Scheduler statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    /// Number of per-symbol tasks.
    pub stream_count: usize,
    /// Symbols being polled.
    pub active_symbols: Vec<String>,
    /// Market overview task state.
    pub market_overview_running: bool,
    /// Portfolio feed task state.
    pub portfolio_feed_running: bool,
}

/// Map upstream index levels to the overview broadcast.
///
/// Keeps the fixed index order; indices missing from `levels` or reporting
/// a zero value are left out.
#[must_use]
pub fn market_overview(levels: &HashMap<String, IndexLevel>, at: DateTime<Utc>) -> Vec<MarketIndex> {
    MARKET_INDICES
        .iter()
        .filter_map(|(ticker, name)| {
            levels
                .get(*ticker)
                .filter(|level| !level.value.is_zero())
                .map(|level| MarketIndex::from_level(ticker, name, *level, at))
        })
        .collect()
}

// =============================================================================
// Task Bodies
// =============================================================================

fn poll_interval(period: Duration) -> time::Interval {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn run_symbol_stream(
    ctx: PollContext,
    symbol: Symbol,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = poll_interval(period);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let started = Instant::now();
        let polled = tokio::select! {
            () = cancel.cancelled() => break,
            polled = time::timeout(ctx.upstream_timeout, ctx.source.get_quote(&symbol)) => polled,
        };

        let (outcome, quote) = match polled {
            Ok(Ok(Some(quote))) => (PollOutcome::Success, Some(quote)),
            Ok(Ok(None)) => {
                tracing::debug!(symbol = %symbol, "No quote available");
                (PollOutcome::Empty, None)
            }
            Ok(Err(e)) => {
                tracing::warn!(symbol = %symbol, error = %e, "Quote poll failed");
                (PollOutcome::Failed, None)
            }
            Err(_) => {
                tracing::warn!(
                    symbol = %symbol,
                    timeout = ?ctx.upstream_timeout,
                    "Quote poll timed out"
                );
                (PollOutcome::TimedOut, None)
            }
        };
        metrics::record_poll(PollKind::Symbol, outcome, started.elapsed());

        if let Some(quote) = quote
            && ctx.events.send(StreamEvent::Quote(quote)).await.is_err()
        {
            tracing::debug!(symbol = %symbol, "Event channel closed");
            break;
        }
    }

    tracing::debug!(symbol = %symbol, "Symbol stream task exited");
}

async fn run_market_overview(ctx: PollContext, period: Duration, cancel: CancellationToken) {
    let mut ticker = poll_interval(period);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let started = Instant::now();
        let polled = tokio::select! {
            () = cancel.cancelled() => break,
            polled = time::timeout(ctx.upstream_timeout, ctx.source.get_market_indices()) => polled,
        };

        let (outcome, indices) = match polled {
            Ok(Ok(levels)) => {
                let indices = market_overview(&levels, Utc::now());
                let outcome = if indices.is_empty() {
                    PollOutcome::Empty
                } else {
                    PollOutcome::Success
                };
                (outcome, Some(indices))
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Market overview poll failed");
                (PollOutcome::Failed, None)
            }
            Err(_) => {
                tracing::warn!(
                    timeout = ?ctx.upstream_timeout,
                    "Market overview poll timed out"
                );
                (PollOutcome::TimedOut, None)
            }
        };
        metrics::record_poll(PollKind::Market, outcome, started.elapsed());

        if let Some(indices) = indices
            && ctx.events.send(StreamEvent::Market(indices)).await.is_err()
        {
            break;
        }
    }

    tracing::debug!("Market overview task exited");
}

async fn run_portfolio_feed(
    portfolio: Arc<PortfolioSimulator>,
    registry: Arc<ConnectionRegistry>,
    events: mpsc::Sender<StreamEvent>,
    period: Duration,
    cancel: CancellationToken,
) {
    // New subscribers get a snapshot immediately, so the feed waits one period.
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if registry.portfolio_count() == 0 {
            continue;
        }

        if events
            .send(StreamEvent::Portfolio(portfolio.snapshot()))
            .await
            .is_err()
        {
            break;
        }
    }

    tracing::debug!("Portfolio feed task exited");
}

// =============================================================================
// Tests
// =============================================================================
