//! Quote Source Port (Driven Port)
//!
//! Interface to the upstream market-data provider. Implementations own
//! their caching and throttling; callers only see a fallible lookup.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::market::{IndexLevel, Quote, Symbol};

/// Quote source error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuoteSourceError {
    /// Request could not be sent or the connection failed.
    #[error("quote source transport error: {message}")]
    Transport {
        /// Error details.
        message: String,
    },

    /// Upstream answered with a non-success status.
    #[error("quote source returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// Upstream answered but the body could not be understood.
    #[error("quote source response could not be decoded: {message}")]
    Decode {
        /// Error details.
        message: String,
    },

    /// Upstream is rate limiting us.
    #[error("quote source rate limited")]
    RateLimited,
}

/// Port for fetching quotes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Latest quote for a symbol; `Ok(None)` when the provider has no data.
    async fn get_quote(&self, symbol: &Symbol) -> Result<Option<Quote>, QuoteSourceError>;

    /// Current levels for the market overview indices, keyed by upstream
    /// ticker (e.g. `^GSPC`). Indices without data are omitted.
    async fn get_market_indices(&self) -> Result<HashMap<String, IndexLevel>, QuoteSourceError>;
}
