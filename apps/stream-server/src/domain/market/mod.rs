//! Market Value Types
//!
//! Immutable snapshots produced by the quote source and pushed to clients:
//! validated ticker symbols, per-symbol quotes, market index levels, and
//! the simulated portfolio snapshot.
//!
//! Prices are `Decimal` internally and serialized as JSON numbers so that
//! browser clients receive plain numeric fields.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Symbol
// =============================================================================

/// Maximum ticker length accepted by the streaming server.
pub const MAX_SYMBOL_LEN: usize = 5;

/// A validated stock ticker: 1-5 ASCII uppercase letters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Parse a ticker exactly as given.
    ///
    /// # Errors
    ///
    /// Returns `SymbolError::InvalidFormat` unless the input is 1-5 ASCII
    /// uppercase letters.
    pub fn parse(value: &str) -> Result<Self, SymbolError> {
        let valid = (1..=MAX_SYMBOL_LEN).contains(&value.len())
            && value.bytes().all(|b| b.is_ascii_uppercase());

        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(SymbolError::InvalidFormat(value.to_string()))
        }
    }

    /// Uppercase the input, then parse it.
    ///
    /// Clients routinely send lowercase tickers; `"aapl"` is accepted as
    /// `AAPL` while `"aapl1"` is still rejected.
    ///
    /// # Errors
    ///
    /// Returns `SymbolError::InvalidFormat` if the uppercased input is not a
    /// valid ticker.
    pub fn normalize(value: &str) -> Result<Self, SymbolError> {
        Self::parse(value.to_ascii_uppercase().as_str())
    }

    /// Get the ticker string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Symbol validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// Not 1-5 uppercase letters.
    #[error("Invalid symbol format")]
    InvalidFormat(String),
}

// =============================================================================
// Quote
// =============================================================================

/// Point-in-time price/volume snapshot for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Last traded price.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Absolute change from the previous close.
    #[serde(with = "rust_decimal::serde::float")]
    pub change: Decimal,
    /// Percent change from the previous close.
    #[serde(with = "rust_decimal::serde::float")]
    pub change_percent: Decimal,
    /// Session volume.
    pub volume: u64,
    /// When the quote was observed.
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Build a quote from a price and the previous close, deriving the
    /// change fields (rounded to cents and hundredths of a percent).
    #[must_use]
    pub fn from_previous_close(
        symbol: Symbol,
        price: Decimal,
        previous_close: Decimal,
        volume: u64,
    ) -> Self {
        let change = price - previous_close;
        let change_percent = if previous_close.is_zero() {
            Decimal::ZERO
        } else {
            change / previous_close * Decimal::ONE_HUNDRED
        };

        Self {
            symbol,
            price: price.round_dp(2),
            change: change.round_dp(2),
            change_percent: change_percent.round_dp(2),
            volume,
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Market Indices
// =============================================================================

/// Upstream tickers for the market overview with their display names.
pub const MARKET_INDICES: [(&str, &str); 3] = [
    ("^GSPC", "S&P 500"),
    ("^IXIC", "NASDAQ"),
    ("^DJI", "Dow Jones"),
];

/// Raw index level as reported by the quote source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexLevel {
    /// Index value.
    pub value: Decimal,
    /// Absolute change.
    pub change: Decimal,
    /// Percent change.
    pub change_percent: Decimal,
}

/// One entry of the market overview broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketIndex {
    /// Display name, e.g. "S&P 500".
    pub name: String,
    /// Ticker without the caret, e.g. "GSPC".
    pub symbol: String,
    /// Index value.
    #[serde(with = "rust_decimal::serde::float")]
    pub value: Decimal,
    /// Absolute change.
    #[serde(with = "rust_decimal::serde::float")]
    pub change: Decimal,
    /// Percent change.
    #[serde(with = "rust_decimal::serde::float")]
    pub change_percent: Decimal,
    /// When the level was observed.
    pub timestamp: DateTime<Utc>,
}

impl MarketIndex {
    /// Build an overview entry from an upstream ticker and its level.
    #[must_use]
    pub fn from_level(ticker: &str, name: &str, level: IndexLevel, at: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            symbol: ticker.trim_start_matches('^').to_string(),
            value: level.value.round_dp(2),
            change: level.change.round_dp(2),
            change_percent: level.change_percent.round_dp(2),
            timestamp: at,
        }
    }
}

// =============================================================================
// Portfolio
// =============================================================================

/// One position in the portfolio snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioHolding {
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Share count.
    pub shares: u32,
    /// Current price per share.
    #[serde(with = "rust_decimal::serde::float")]
    pub current_price: Decimal,
    /// Purchase price per share.
    #[serde(with = "rust_decimal::serde::float")]
    pub purchase_price: Decimal,
    /// Shares times current price.
    #[serde(with = "rust_decimal::serde::float")]
    pub market_value: Decimal,
    /// Unrealized gain.
    #[serde(with = "rust_decimal::serde::float")]
    pub gain: Decimal,
    /// Unrealized gain in percent of cost basis.
    #[serde(with = "rust_decimal::serde::float")]
    pub gain_percent: Decimal,
}

impl PortfolioHolding {
    /// Cost basis of the position.
    #[must_use]
    pub fn cost_basis(&self) -> Decimal {
        self.purchase_price * Decimal::from(self.shares)
    }
}

/// Aggregate portfolio view pushed on each portfolio tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSnapshot {
    /// Sum of market values.
    #[serde(with = "rust_decimal::serde::float")]
    pub total_value: Decimal,
    /// Simulated change since the open.
    #[serde(with = "rust_decimal::serde::float")]
    pub day_change: Decimal,
    /// Simulated change since the open, in percent.
    #[serde(with = "rust_decimal::serde::float")]
    pub day_change_percent: Decimal,
    /// Total unrealized gain.
    #[serde(with = "rust_decimal::serde::float")]
    pub total_gain: Decimal,
    /// Total unrealized gain in percent of cost basis.
    #[serde(with = "rust_decimal::serde::float")]
    pub total_gain_percent: Decimal,
    /// Individual positions.
    pub holdings: Vec<PortfolioHolding>,
    /// When the snapshot was generated.
    pub last_updated: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================
