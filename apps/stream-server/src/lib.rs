#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Stock Stream Server - Real-time Quote Fan-out
//!
//! A WebSocket server that polls an upstream quote provider once per
//! subscribed symbol and fans each update out to every connection watching
//! that symbol. Also streams a market overview to every connection, a
//! simulated portfolio to portfolio subscribers, and one-shot price alerts.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: State with no I/O
//!   - `market`: Symbols, quotes, market indices, portfolio snapshots
//!   - `connection`: Connection registry and subscription indexes
//!   - `alert`: Price alert engine
//!   - `notification`: Targeted and broadcast notifications
//!   - `streaming`: Internal stream events and the client wire protocol
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Quote source interface
//!   - `services`: Stream scheduler, subscription router, dispatcher,
//!     streaming service facade
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `quote_source`: Yahoo Finance and simulated quote sources
//!   - `http`: WebSocket endpoint, health, stats and metrics routes
//!   - `config`, `metrics`, `telemetry`: Ambient stack
//!
//! # Data Flow
//!
//! ```text
//!                 ┌─────────────┐  StreamEvent  ┌────────────┐
//! Quote Source ──►│  Scheduler  │──────────────►│ Dispatcher │──► Client outboxes
//!                 └─────────────┘   (mpsc)      └────────────┘
//!                        ▲                            │
//!                 start / stop                 alert evaluation
//!                        │                            ▼
//!                 ┌─────────────┐               ┌────────────┐
//! Client frames ─►│   Router    │               │   Alerts   │
//!                 └─────────────┘               └────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Streaming state with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Component wiring for the binary and integration tests.
pub mod app;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::alert::{AlertCondition, AlertEngine, AlertError, AlertId, AlertStats, PriceAlert};
pub use domain::connection::{ConnectionId, ConnectionRegistry, RegistryStats};
pub use domain::market::{IndexLevel, MarketIndex, PortfolioSnapshot, Quote, Symbol, SymbolError};
pub use domain::notification::{Notification, NotificationKind, NotificationTarget};
pub use domain::streaming::{ClientRequest, ServerEvent, StreamEvent};

// Application
pub use application::ports::{QuoteSource, QuoteSourceError};
pub use application::services::{
    ConnectError, Dispatcher, SchedulerConfig, StreamScheduler, StreamingService,
    SubscriptionError, SubscriptionRouter,
};

// Wiring
pub use app::App;

// Infrastructure config
pub use infrastructure::config::{ConfigError, QuoteSourceKind, ServerConfig};

// HTTP server
pub use infrastructure::http::{HttpServer, HttpServerError, HttpState};

// Quote sources
pub use infrastructure::quote_source::{SimulatedQuoteSource, YahooQuoteSource};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
