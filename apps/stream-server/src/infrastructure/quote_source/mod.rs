//! Quote Source Adapters
//!
//! Implementations of the [`QuoteSource`] port:
//!
//! - [`YahooQuoteSource`]: Yahoo Finance chart API with TTL cache and request throttle
//! - [`SimulatedQuoteSource`]: Offline random walk

mod simulated;
mod throttle;
mod yahoo;

use std::sync::Arc;

pub use simulated::SimulatedQuoteSource;
pub use throttle::RequestThrottle;
pub use yahoo::YahooQuoteSource;

use crate::application::ports::{QuoteSource, QuoteSourceError};
use crate::infrastructure::config::{QuoteSourceKind, QuoteSourceSettings};

/// Build the adapter selected by `settings.kind`.
///
/// # Errors
///
/// Returns an error if the Yahoo HTTP client cannot be built.
pub fn from_settings(
    settings: &QuoteSourceSettings,
) -> Result<Arc<dyn QuoteSource>, QuoteSourceError> {
    match settings.kind {
        QuoteSourceKind::Yahoo => Ok(Arc::new(YahooQuoteSource::new(settings)?)),
        QuoteSourceKind::Simulated => Ok(Arc::new(SimulatedQuoteSource::new())),
    }
}
