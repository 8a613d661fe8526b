//! Application Services
//!
//! Services that orchestrate domain state and the quote source port.
//!
//! - `StreamScheduler`: Per-symbol, market overview and portfolio poll tasks
//! - `SubscriptionRouter`: Maps subscription changes to scheduler start/stop
//! - `Dispatcher`: Fans stream events out to client outboxes
//! - `StreamingService`: Connection lifecycle and client request handling
//! - `PortfolioSimulator`: Simulated portfolio snapshots

mod dispatcher;
mod portfolio;
mod router;
mod scheduler;
mod session;

pub use dispatcher::Dispatcher;
pub use portfolio::PortfolioSimulator;
pub use router::{SubscriptionError, SubscriptionRouter};
pub use scheduler::{SchedulerConfig, SchedulerStats, StreamScheduler, market_overview};
pub use session::{
    ClientHandle, ConnectError, DEFAULT_CLIENT_BUFFER, ServerStats, StreamingService,
};
