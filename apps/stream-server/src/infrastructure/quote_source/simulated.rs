//! Simulated quote source.
//!
//! Random walk of at most ±1% per poll. Each ticker opens at a base price
//! derived from its letters, which also serves as the previous close.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::Decimal;

use crate::application::ports::{QuoteSource, QuoteSourceError};
use crate::domain::market::{IndexLevel, Quote, Symbol};

/// Per-poll variation, in basis points.
const STEP_BPS: i64 = 100;

/// Opening levels for the overview indices.
const INDEX_BASES: [(&str, i64); 3] = [("^GSPC", 5000), ("^IXIC", 16_000), ("^DJI", 39_000)];

#[derive(Debug, Clone, Copy)]
struct Walk {
    open: Decimal,
    last: Decimal,
}

/// Offline quote source for demos and tests.
#[derive(Debug, Default)]
pub struct SimulatedQuoteSource {
    walks: Mutex<HashMap<String, Walk>>,
}

impl SimulatedQuoteSource {
    /// Create a source with no history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn step(&self, ticker: &str, open: Decimal) -> Walk {
        let bps = rand::rng().random_range(-STEP_BPS..=STEP_BPS);
        let factor = Decimal::ONE + Decimal::new(bps, 4);

        let mut walks = self.walks.lock();
        let walk = walks
            .entry(ticker.to_string())
            .or_insert(Walk { open, last: open });
        walk.last = (walk.last * factor).round_dp(2);
        *walk
    }
}

/// Deterministic opening price between 20.00 and 519.00.
fn base_price(symbol: &Symbol) -> Decimal {
    let seed = symbol
        .as_str()
        .bytes()
        .fold(0_i64, |acc, b| (acc * 31 + i64::from(b)) % 500);
    Decimal::from(20 + seed)
}

#[async_trait]
impl QuoteSource for SimulatedQuoteSource {
    async fn get_quote(&self, symbol: &Symbol) -> Result<Option<Quote>, QuoteSourceError> {
        let walk = self.step(symbol.as_str(), base_price(symbol));
        let volume = rand::rng().random_range(100_000..5_000_000);
        Ok(Some(Quote::from_previous_close(
            symbol.clone(),
            walk.last,
            walk.open,
            volume,
        )))
    }

    async fn get_market_indices(&self) -> Result<HashMap<String, IndexLevel>, QuoteSourceError> {
        let levels = INDEX_BASES
            .iter()
            .map(|(ticker, base)| {
                let walk = self.step(ticker, Decimal::from(*base));
                let change = walk.last - walk.open;
                let level = IndexLevel {
                    value: walk.last,
                    change,
                    change_percent: change / walk.open * Decimal::ONE_HUNDRED,
                };
                ((*ticker).to_string(), level)
            })
            .collect();
        Ok(levels)
    }
}
