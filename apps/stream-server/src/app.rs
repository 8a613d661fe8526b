//! Component Wiring
//!
//! Builds the streaming components from configuration and owns the
//! background tasks that live for the whole process: the dispatcher
//! consumer, the market overview and the portfolio feed.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::QuoteSource;
use crate::application::services::{
    Dispatcher, PortfolioSimulator, SchedulerConfig, StreamScheduler, StreamingService,
};
use crate::domain::alert::AlertEngine;
use crate::domain::connection::ConnectionRegistry;
use crate::infrastructure::config::ServerConfig;
use crate::infrastructure::http::{HttpServer, HttpState};

/// Capacity of the scheduler → dispatcher channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Running streaming components.
pub struct App {
    service: Arc<StreamingService>,
    scheduler: Arc<StreamScheduler>,
    dispatcher: JoinHandle<()>,
    shutdown: CancellationToken,
    port: u16,
}

impl App {
    /// Build every component and start the background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(
        config: &ServerConfig,
        source: Arc<dyn QuoteSource>,
        shutdown: CancellationToken,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let registry = Arc::new(ConnectionRegistry::new(
            config.server.max_connections_per_origin,
        ));
        let alerts = Arc::new(AlertEngine::new());
        let portfolio = Arc::new(PortfolioSimulator::new());
        let scheduler = Arc::new(StreamScheduler::new(
            source,
            events_tx,
            SchedulerConfig::from(&config.streams),
            shutdown.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), Arc::clone(&alerts)));

        let service = Arc::new(StreamingService::new(
            Arc::clone(&registry),
            alerts,
            Arc::clone(&scheduler),
            Arc::clone(&dispatcher),
            Arc::clone(&portfolio),
            config.server.client_buffer_capacity,
        ));

        scheduler.start_market_overview();
        scheduler.start_portfolio_feed(portfolio, registry);
        let dispatcher = tokio::spawn(dispatcher.run(events_rx, shutdown.clone()));

        Self {
            service,
            scheduler,
            dispatcher,
            shutdown,
            port: config.server.port,
        }
    }

    /// The streaming service facade.
    #[must_use]
    pub fn service(&self) -> Arc<StreamingService> {
        Arc::clone(&self.service)
    }

    /// The stream scheduler.
    #[must_use]
    pub fn scheduler(&self) -> Arc<StreamScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// HTTP server bound to the configured port, sharing this app's
    /// shutdown token.
    #[must_use]
    pub fn http_server(&self) -> HttpServer {
        let state = Arc::new(HttpState::new(self.service(), self.shutdown.clone()));
        HttpServer::new(self.port, state, self.shutdown.clone())
    }

    /// Cancel every task and wait for the dispatcher to drain.
    pub async fn stop(self) {
        self.shutdown.cancel();
        self.scheduler.shutdown();
        if let Err(e) = self.dispatcher.await {
            tracing::error!(error = %e, "Dispatcher task failed");
        }
    }
}
