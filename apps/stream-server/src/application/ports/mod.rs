//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `QuoteSource`: Upstream provider of symbol quotes and index levels

mod quote_source;

#[cfg(test)]
pub use quote_source::MockQuoteSource;
pub use quote_source::{QuoteSource, QuoteSourceError};
