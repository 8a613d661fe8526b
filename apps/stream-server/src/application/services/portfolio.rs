//! Simulated Portfolio Feed
//!
//! Three fixed holdings whose prices drift randomly around their running
//! gain on every snapshot. Stands in for a real portfolio store.

use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::Decimal;

use crate::domain::market::{PortfolioHolding, PortfolioSnapshot, Symbol};

/// Per-snapshot price variation, in basis points (±2%).
const PRICE_VARIATION_BPS: i64 = 200;

/// Simulated day change, in hundredths of a percent (±3%).
const DAY_CHANGE_CENTS: i64 = 300;

/// Generates portfolio snapshots.
#[derive(Debug)]
pub struct PortfolioSimulator {
    holdings: Mutex<Vec<PortfolioHolding>>,
}

impl Default for PortfolioSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl PortfolioSimulator {
    /// Start from the demo holdings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_holdings(default_holdings())
    }

    /// Start from custom holdings.
    #[must_use]
    pub fn with_holdings(holdings: Vec<PortfolioHolding>) -> Self {
        Self {
            holdings: Mutex::new(holdings),
        }
    }

    /// Move every holding and produce a snapshot of the new state.
    ///
    /// Each price is re-derived from the purchase price, the previous gain,
    /// and a fresh ±2% variation; the moved holdings become the baseline
    /// for the next call.
    #[must_use]
    pub fn snapshot(&self) -> PortfolioSnapshot {
        let mut rng = rand::rng();
        let mut holdings = self.holdings.lock();

        for holding in holdings.iter_mut() {
            let variation = Decimal::new(
                rng.random_range(-PRICE_VARIATION_BPS..=PRICE_VARIATION_BPS),
                4,
            );
            let factor = Decimal::ONE + holding.gain_percent / Decimal::ONE_HUNDRED + variation;
            let price = holding.purchase_price * factor;
            reprice(holding, price);
        }

        let day_change_percent =
            Decimal::new(rng.random_range(-DAY_CHANGE_CENTS..=DAY_CHANGE_CENTS), 2);

        summarize(&holdings, day_change_percent)
    }
}

fn reprice(holding: &mut PortfolioHolding, price: Decimal) {
    let cost = holding.cost_basis();
    let market_value = price * Decimal::from(holding.shares);
    let gain = market_value - cost;

    holding.current_price = price.round_dp(2);
    holding.market_value = market_value.round_dp(2);
    holding.gain = gain.round_dp(2);
    holding.gain_percent = if cost.is_zero() {
        Decimal::ZERO
    } else {
        (gain / cost * Decimal::ONE_HUNDRED).round_dp(2)
    };
}

fn summarize(holdings: &[PortfolioHolding], day_change_percent: Decimal) -> PortfolioSnapshot {
    let total_value: Decimal = holdings.iter().map(|h| h.market_value).sum();
    let total_cost: Decimal = holdings.iter().map(PortfolioHolding::cost_basis).sum();
    let total_gain = total_value - total_cost;
    let total_gain_percent = if total_cost.is_zero() {
        Decimal::ZERO
    } else {
        total_gain / total_cost * Decimal::ONE_HUNDRED
    };
    let day_change = total_value * day_change_percent / Decimal::ONE_HUNDRED;

    PortfolioSnapshot {
        total_value: total_value.round_dp(2),
        day_change: day_change.round_dp(2),
        day_change_percent: day_change_percent.round_dp(2),
        total_gain: total_gain.round_dp(2),
        total_gain_percent: total_gain_percent.round_dp(2),
        holdings: holdings.to_vec(),
        last_updated: Utc::now(),
    }
}

fn default_holdings() -> Vec<PortfolioHolding> {
    [
        ("AAPL", 50, Decimal::new(18000, 2)),
        ("MSFT", 25, Decimal::new(40000, 2)),
        ("GOOGL", 5, Decimal::new(290_000, 2)),
    ]
    .into_iter()
    .filter_map(|(ticker, shares, purchase_price)| {
        let mut holding = PortfolioHolding {
            symbol: Symbol::parse(ticker).ok()?,
            shares,
            current_price: purchase_price,
            purchase_price,
            market_value: Decimal::ZERO,
            gain: Decimal::ZERO,
            gain_percent: Decimal::ZERO,
        };
        reprice(&mut holding, purchase_price);
        Some(holding)
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_portfolio_has_three_holdings() {
        let snapshot = PortfolioSimulator::new().snapshot();
        let symbols: Vec<_> = snapshot.holdings.iter().map(|h| h.symbol.as_str()).collect();
        assert_eq!(symbols, ["AAPL", "MSFT", "GOOGL"]);
    }

    #[test]
    fn first_snapshot_stays_within_two_percent() {
        let snapshot = PortfolioSimulator::new().snapshot();

        for holding in &snapshot.holdings {
            let low = holding.purchase_price * dec!(0.98);
            let high = holding.purchase_price * dec!(1.02);
            assert!(
                holding.current_price >= low.round_dp(2) && holding.current_price <= high.round_dp(2),
                "{} moved to {}",
                holding.symbol,
                holding.current_price
            );
        }
    }

    #[test]
    fn totals_are_consistent() {
        let snapshot = PortfolioSimulator::new().snapshot();

        let value: Decimal = snapshot.holdings.iter().map(|h| h.market_value).sum();
        assert_eq!(snapshot.total_value, value.round_dp(2));
        assert!(snapshot.day_change_percent.abs() <= dec!(3));

        let cost: Decimal = snapshot.holdings.iter().map(PortfolioHolding::cost_basis).sum();
        assert_eq!(snapshot.total_gain, (value - cost).round_dp(2));
    }

    #[test]
    fn reprice_rounds_to_cents() {
        let mut holding = PortfolioHolding {
            symbol: Symbol::parse("AAPL").unwrap(),
            shares: 3,
            current_price: dec!(10),
            purchase_price: dec!(10),
            market_value: dec!(30),
            gain: dec!(0),
            gain_percent: dec!(0),
        };

        reprice(&mut holding, dec!(10.333));

        assert_eq!(holding.current_price, dec!(10.33));
        assert_eq!(holding.market_value, dec!(31.00));
        assert_eq!(holding.gain, dec!(1.00));
        assert_eq!(holding.gain_percent, dec!(3.33));
    }
}
