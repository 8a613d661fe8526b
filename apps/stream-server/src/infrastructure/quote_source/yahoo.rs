//! Yahoo Finance Chart Adapter
//!
//! Reads `meta` from the v8 chart endpoint (`GET {base}/{ticker}`):
//!
//! - price: `regularMarketPrice`, falling back to `previousClose`
//! - previous close: `previousClose`, falling back to `chartPreviousClose`
//! - volume: `regularMarketVolume`
//!
//! Fetched snapshots are cached per ticker for the configured TTL, and every
//! outbound request passes through a [`RequestThrottle`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::time::Instant;

use super::throttle::RequestThrottle;
use crate::application::ports::{QuoteSource, QuoteSourceError};
use crate::domain::market::{IndexLevel, MARKET_INDICES, Quote, Symbol};
use crate::infrastructure::config::QuoteSourceSettings;

/// HTTP request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Browser-like agent; the chart API rejects empty agents.
const USER_AGENT: &str = "Mozilla/5.0 (compatible; stock-stream-server)";

// =============================================================================
// Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default, with = "rust_decimal::serde::float_option")]
    regular_market_price: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    previous_close: Option<Decimal>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    chart_previous_close: Option<Decimal>,
    #[serde(default)]
    regular_market_volume: Option<u64>,
}

/// Price data extracted from one chart response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    price: Decimal,
    previous_close: Decimal,
    volume: u64,
}

impl Snapshot {
    fn from_meta(meta: &ChartMeta) -> Option<Self> {
        let previous_close = meta.previous_close.or(meta.chart_previous_close);
        let price = meta.regular_market_price.or(previous_close)?;
        Some(Self {
            price,
            previous_close: previous_close.unwrap_or(price),
            volume: meta.regular_market_volume.unwrap_or(0),
        })
    }

    fn index_level(self) -> IndexLevel {
        let change = self.price - self.previous_close;
        let change_percent = if self.previous_close.is_zero() {
            Decimal::ZERO
        } else {
            change / self.previous_close * Decimal::ONE_HUNDRED
        };
        IndexLevel {
            value: self.price,
            change,
            change_percent,
        }
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// Quote source backed by the Yahoo Finance chart API.
#[derive(Debug)]
pub struct YahooQuoteSource {
    client: Client,
    base_url: String,
    cache_ttl: Duration,
    cache: Mutex<HashMap<String, (Instant, Snapshot)>>,
    throttle: RequestThrottle,
}

impl YahooQuoteSource {
    /// Create the adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &QuoteSourceSettings) -> Result<Self, QuoteSourceError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| QuoteSourceError::Transport {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: settings.yahoo_base_url.trim_end_matches('/').to_string(),
            cache_ttl: settings.cache_ttl,
            cache: Mutex::new(HashMap::new()),
            throttle: RequestThrottle::new(settings.min_request_interval),
        })
    }

    fn cached(&self, ticker: &str) -> Option<Snapshot> {
        let cache = self.cache.lock();
        cache
            .get(ticker)
            .filter(|(fetched_at, _)| fetched_at.elapsed() < self.cache_ttl)
            .map(|(_, snapshot)| *snapshot)
    }

    async fn snapshot(&self, ticker: &str) -> Result<Option<Snapshot>, QuoteSourceError> {
        if let Some(snapshot) = self.cached(ticker) {
            tracing::trace!(ticker, "Quote cache hit");
            return Ok(Some(snapshot));
        }

        let fetched = self.fetch(ticker).await?;
        if let Some(snapshot) = fetched {
            self.cache
                .lock()
                .insert(ticker.to_string(), (Instant::now(), snapshot));
        }
        Ok(fetched)
    }

    async fn fetch(&self, ticker: &str) -> Result<Option<Snapshot>, QuoteSourceError> {
        self.throttle.acquire().await;

        let url = format!("{}/{}", self.base_url, ticker.replace('^', "%5E"));
        tracing::debug!(ticker, "Fetching chart");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| QuoteSourceError::Transport {
                message: e.to_string(),
            })?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(QuoteSourceError::RateLimited),
            StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => {
                return Err(QuoteSourceError::Status {
                    status: status.as_u16(),
                });
            }
            _ => {}
        }

        let body: ChartResponse = response
            .json()
            .await
            .map_err(|e| QuoteSourceError::Decode {
                message: e.to_string(),
            })?;

        Ok(body
            .chart
            .result
            .and_then(|results| results.into_iter().next())
            .and_then(|result| Snapshot::from_meta(&result.meta)))
    }
}

#[async_trait]
impl QuoteSource for YahooQuoteSource {
    async fn get_quote(&self, symbol: &Symbol) -> Result<Option<Quote>, QuoteSourceError> {
        let snapshot = self.snapshot(symbol.as_str()).await?;
        Ok(snapshot.map(|s| {
            Quote::from_previous_close(symbol.clone(), s.price, s.previous_close, s.volume)
        }))
    }

    async fn get_market_indices(&self) -> Result<HashMap<String, IndexLevel>, QuoteSourceError> {
        let mut levels = HashMap::new();
        let mut last_error = None;

        for (ticker, _) in MARKET_INDICES {
            match self.snapshot(ticker).await {
                Ok(Some(snapshot)) => {
                    levels.insert(ticker.to_string(), snapshot.index_level());
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(ticker, error = %e, "Failed to fetch market index");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if levels.is_empty() => Err(e),
            _ => Ok(levels),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
