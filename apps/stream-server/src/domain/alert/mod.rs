//! Price Alert Engine
//!
//! Client-created price thresholds evaluated against every quote for
//! their symbol. An alert fires at most once: the first quote that meets
//! its condition deactivates it and yields a notification for the owner.
//!
//! Evaluation takes the write lock for the whole pass, so two concurrent
//! quotes for the same symbol cannot both fire the same alert.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::connection::ConnectionId;
use crate::domain::market::Symbol;
use crate::domain::notification::{Notification, NotificationKind, NotificationTarget};

// =============================================================================
// Types
// =============================================================================

/// Unique alert identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct AlertId(Uuid);

impl AlertId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for AlertId {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self).map_err(|_| AlertError::NotFound)
    }
}

/// Trigger direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCondition {
    /// Fires when price >= target.
    Above,
    /// Fires when price <= target.
    Below,
}

impl AlertCondition {
    /// Whether `price` meets this condition relative to `target`.
    #[must_use]
    pub fn is_met(self, price: Decimal, target: Decimal) -> bool {
        match self {
            Self::Above => price >= target,
            Self::Below => price <= target,
        }
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Above => "above",
            Self::Below => "below",
        }
    }
}

impl FromStr for AlertCondition {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "above" => Ok(Self::Above),
            "below" => Ok(Self::Below),
            _ => Err(AlertError::InvalidCondition),
        }
    }
}

/// Unvalidated alert request as sent by a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRequest {
    /// Ticker, any case.
    pub symbol: Option<String>,
    /// Threshold price.
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub target_price: Option<Decimal>,
    /// "above" or "below".
    pub condition: Option<String>,
}

/// A stored price alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceAlert {
    /// Alert id.
    pub id: AlertId,
    /// Watched symbol.
    pub symbol: Symbol,
    /// Threshold price, always positive.
    pub target_price: Decimal,
    /// Trigger direction.
    pub condition: AlertCondition,
    /// Connection that created the alert.
    pub owner: ConnectionId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// `false` once the alert has fired.
    pub active: bool,
}

impl PriceAlert {
    fn trigger_notification(&self, current_price: Decimal) -> Notification {
        Notification::new(
            NotificationKind::PriceAlert,
            "Price Alert Triggered",
            format!(
                "{} has reached ${:.2} ({} ${})",
                self.symbol,
                current_price,
                self.condition.as_str(),
                self.target_price
            ),
            NotificationTarget::Connection(self.owner),
        )
        .with_data(serde_json::json!({
            "symbol": self.symbol,
            "targetPrice": decimal_to_json(self.target_price),
            "currentPrice": decimal_to_json(current_price),
            "condition": self.condition,
            "alertId": self.id,
        }))
    }
}

fn decimal_to_json(value: Decimal) -> serde_json::Value {
    serde_json::to_value(rust_decimal::prelude::ToPrimitive::to_f64(&value))
        .unwrap_or(serde_json::Value::Null)
}

// =============================================================================
// Errors
// =============================================================================

/// Alert errors. `Display` is the message sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AlertError {
    /// A required field is missing or empty.
    #[error("Invalid price alert data")]
    InvalidData,
    /// The symbol is not a valid ticker.
    #[error("Invalid symbol format")]
    InvalidSymbol,
    /// The target price is zero or negative.
    #[error("Target price must be positive")]
    NonPositiveTarget,
    /// The condition is not "above" or "below".
    #[error("Condition must be \"above\" or \"below\"")]
    InvalidCondition,
    /// No alert with that id exists.
    #[error("Price alert not found")]
    NotFound,
    /// The alert belongs to another connection.
    #[error("You can only remove your own alerts")]
    NotOwner,
}

// =============================================================================
// Alert Book
// =============================================================================

#[derive(Debug, Default)]
struct AlertBook {
    alerts: HashMap<AlertId, PriceAlert>,
    by_owner: HashMap<ConnectionId, HashSet<AlertId>>,
}

impl AlertBook {
    fn delete(&mut self, id: AlertId) -> Option<PriceAlert> {
        let alert = self.alerts.remove(&id)?;
        if let Some(owned) = self.by_owner.get_mut(&alert.owner) {
            owned.remove(&id);
            if owned.is_empty() {
                self.by_owner.remove(&alert.owner);
            }
        }
        Some(alert)
    }
}

// =============================================================================
// Alert Engine
// =============================================================================

/// Thread-safe store and evaluator for price alerts.
#[derive(Debug, Default)]
pub struct AlertEngine {
    book: RwLock<AlertBook>,
}

impl AlertEngine {
    /// Create an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a request and store an active alert for `owner`.
    ///
    /// Checks run in order: required fields, symbol format, target
    /// positivity, condition.
    pub fn create_alert(
        &self,
        owner: ConnectionId,
        request: &AlertRequest,
    ) -> Result<PriceAlert, AlertError> {
        let (Some(symbol), Some(target_price), Some(condition)) = (
            request.symbol.as_deref(),
            request.target_price,
            request.condition.as_deref(),
        ) else {
            return Err(AlertError::InvalidData);
        };

        if symbol.is_empty() || condition.is_empty() {
            return Err(AlertError::InvalidData);
        }

        let symbol = Symbol::normalize(symbol).map_err(|_| AlertError::InvalidSymbol)?;

        if target_price <= Decimal::ZERO {
            return Err(AlertError::NonPositiveTarget);
        }

        let condition = condition.parse::<AlertCondition>()?;

        let alert = PriceAlert {
            id: AlertId::generate(),
            symbol,
            target_price,
            condition,
            owner,
            created_at: Utc::now(),
            active: true,
        };

        let mut book = self.book.write();
        book.by_owner.entry(owner).or_default().insert(alert.id);
        book.alerts.insert(alert.id, alert.clone());

        Ok(alert)
    }

    /// Delete one of `owner`'s alerts.
    pub fn remove_alert(&self, owner: ConnectionId, alert_id: &str) -> Result<AlertId, AlertError> {
        let id = alert_id.parse::<AlertId>()?;
        let mut book = self.book.write();

        let alert = book.alerts.get(&id).ok_or(AlertError::NotFound)?;
        if alert.owner != owner {
            return Err(AlertError::NotOwner);
        }

        book.delete(id);
        Ok(id)
    }

    /// Fire every active alert on `symbol` whose condition `price` meets.
    ///
    /// Fired alerts are deactivated before the lock is released. Returns one
    /// notification per fired alert, addressed to its owner.
    pub fn evaluate(&self, symbol: &Symbol, price: Decimal) -> Vec<Notification> {
        let mut book = self.book.write();

        book.alerts
            .values_mut()
            .filter(|alert| {
                alert.active
                    && alert.symbol == *symbol
                    && alert.condition.is_met(price, alert.target_price)
            })
            .map(|alert| {
                alert.active = false;
                tracing::info!(
                    alert_id = %alert.id,
                    connection_id = %alert.owner,
                    symbol = %alert.symbol,
                    condition = alert.condition.as_str(),
                    target = %alert.target_price,
                    price = %price,
                    "Price alert triggered"
                );
                alert.trigger_notification(price)
            })
            .collect()
    }

    /// Delete every alert owned by `owner`. Returns how many were removed.
    pub fn cleanup(&self, owner: ConnectionId) -> usize {
        let mut book = self.book.write();
        let Some(ids) = book.by_owner.remove(&owner) else {
            return 0;
        };

        for id in &ids {
            book.alerts.remove(id);
        }
        ids.len()
    }

    /// Look up one alert.
    #[must_use]
    pub fn get(&self, id: AlertId) -> Option<PriceAlert> {
        self.book.read().alerts.get(&id).cloned()
    }

    /// Alerts owned by one connection.
    #[must_use]
    pub fn alerts_for(&self, owner: ConnectionId) -> Vec<PriceAlert> {
        let book = self.book.read();
        book.by_owner
            .get(&owner)
            .map(|ids| ids.iter().filter_map(|id| book.alerts.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Statistics; `subscriber_count` is the notification subscriber count,
    /// which the registry owns.
    #[must_use]
    pub fn stats(&self, subscriber_count: usize) -> AlertStats {
        let book = self.book.read();
        let mut per_symbol_active_counts = BTreeMap::new();
        let mut active_alerts = 0;

        for alert in book.alerts.values().filter(|a| a.active) {
            active_alerts += 1;
            *per_symbol_active_counts
                .entry(alert.symbol.to_string())
                .or_insert(0) += 1;
        }

        AlertStats {
            subscriber_count,
            total_alerts: book.alerts.len(),
            active_alerts,
            per_symbol_active_counts,
        }
    }
}

/// Alert statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStats {
    /// Notification subscribers.
    pub subscriber_count: usize,
    /// Stored alerts, fired ones included.
    pub total_alerts: usize,
    /// Alerts that have not fired yet.
    pub active_alerts: usize,
    /// Active alerts per symbol.
    pub per_symbol_active_counts: BTreeMap<String, usize>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    fn request(symbol: &str, target: Decimal, condition: &str) -> AlertRequest {
        AlertRequest {
            symbol: Some(symbol.to_string()),
            target_price: Some(target),
            condition: Some(condition.to_string()),
        }
    }

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[test]
    fn create_alert_stores_active_alert() {
        let engine = AlertEngine::new();
        let owner = ConnectionId::new();

        let alert = engine
            .create_alert(owner, &request("aapl", dec!(200), "above"))
            .unwrap();

        assert_eq!(alert.symbol.as_str(), "AAPL");
        assert!(alert.active);
        assert_eq!(engine.get(alert.id).unwrap().owner, owner);
        assert_eq!(engine.alerts_for(owner).len(), 1);
    }

    #[test_case(AlertRequest::default(), AlertError::InvalidData ; "all missing")]
    #[test_case(AlertRequest { target_price: None, ..request("AAPL", dec!(1), "above") }, AlertError::InvalidData ; "missing target")]
    #[test_case(request("", dec!(1), "above"), AlertError::InvalidData ; "empty symbol")]
    #[test_case(request("AAPL1", dec!(1), "above"), AlertError::InvalidSymbol ; "bad symbol")]
    #[test_case(request("AAPL", dec!(0), "above"), AlertError::NonPositiveTarget ; "zero target")]
    #[test_case(request("AAPL", dec!(-5), "above"), AlertError::NonPositiveTarget ; "negative target")]
    #[test_case(request("AAPL", dec!(5), "sideways"), AlertError::InvalidCondition ; "bad condition")]
    fn create_alert_validation(req: AlertRequest, expected: AlertError) {
        let engine = AlertEngine::new();
        assert_eq!(engine.create_alert(ConnectionId::new(), &req), Err(expected));
        assert_eq!(engine.stats(0).total_alerts, 0);
    }

    #[test]
    fn validation_messages_match_wire_text() {
        assert_eq!(AlertError::InvalidData.to_string(), "Invalid price alert data");
        assert_eq!(
            AlertError::InvalidCondition.to_string(),
            "Condition must be \"above\" or \"below\""
        );
        assert_eq!(
            AlertError::NotOwner.to_string(),
            "You can only remove your own alerts"
        );
    }

    #[test]
    fn above_alert_fires_once() {
        let engine = AlertEngine::new();
        let owner = ConnectionId::new();
        let alert = engine
            .create_alert(owner, &request("AAPL", dec!(200), "above"))
            .unwrap();

        assert!(engine.evaluate(&sym("AAPL"), dec!(199)).is_empty());

        let fired = engine.evaluate(&sym("AAPL"), dec!(201));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, NotificationKind::PriceAlert);
        assert_eq!(fired[0].target, NotificationTarget::Connection(owner));
        assert!(!engine.get(alert.id).unwrap().active);

        assert!(engine.evaluate(&sym("AAPL"), dec!(205)).is_empty());
    }

    #[test]
    fn below_alert_fires_on_equal_price() {
        let engine = AlertEngine::new();
        engine
            .create_alert(ConnectionId::new(), &request("MSFT", dec!(400), "below"))
            .unwrap();

        assert!(engine.evaluate(&sym("MSFT"), dec!(400.01)).is_empty());
        assert_eq!(engine.evaluate(&sym("MSFT"), dec!(400)).len(), 1);
    }

    #[test]
    fn evaluate_ignores_other_symbols() {
        let engine = AlertEngine::new();
        engine
            .create_alert(ConnectionId::new(), &request("AAPL", dec!(1), "above"))
            .unwrap();

        assert!(engine.evaluate(&sym("MSFT"), dec!(1000)).is_empty());
    }

    #[test]
    fn trigger_payload_carries_alert_details() {
        let engine = AlertEngine::new();
        let alert = engine
            .create_alert(ConnectionId::new(), &request("AAPL", dec!(200), "above"))
            .unwrap();

        let fired = engine.evaluate(&sym("AAPL"), dec!(201.5));
        let data = fired[0].data.as_ref().unwrap();

        assert_eq!(data["symbol"], "AAPL");
        assert_eq!(data["targetPrice"], 200.0);
        assert_eq!(data["currentPrice"], 201.5);
        assert_eq!(data["condition"], "above");
        assert_eq!(data["alertId"], alert.id.to_string());
        assert_eq!(fired[0].message, "AAPL has reached $201.50 (above $200)");
    }

    #[test]
    fn remove_alert_checks_ownership() {
        let engine = AlertEngine::new();
        let owner = ConnectionId::new();
        let stranger = ConnectionId::new();
        let alert = engine
            .create_alert(owner, &request("AAPL", dec!(200), "above"))
            .unwrap();
        let id = alert.id.to_string();

        assert_eq!(engine.remove_alert(stranger, &id), Err(AlertError::NotOwner));
        assert!(engine.get(alert.id).is_some());

        assert_eq!(engine.remove_alert(owner, &id), Ok(alert.id));
        assert!(engine.get(alert.id).is_none());
        assert_eq!(engine.remove_alert(owner, &id), Err(AlertError::NotFound));
    }

    #[test]
    fn remove_alert_with_garbage_id_is_not_found() {
        let engine = AlertEngine::new();
        assert_eq!(
            engine.remove_alert(ConnectionId::new(), "not-a-uuid"),
            Err(AlertError::NotFound)
        );
    }

    #[test]
    fn cleanup_removes_only_owner_alerts() {
        let engine = AlertEngine::new();
        let gone = ConnectionId::new();
        let stays = ConnectionId::new();
        engine.create_alert(gone, &request("AAPL", dec!(1), "above")).unwrap();
        engine.create_alert(gone, &request("MSFT", dec!(1), "below")).unwrap();
        engine.create_alert(stays, &request("AAPL", dec!(1), "above")).unwrap();

        assert_eq!(engine.cleanup(gone), 2);
        assert_eq!(engine.cleanup(gone), 0);
        assert!(engine.alerts_for(gone).is_empty());
        assert_eq!(engine.stats(0).total_alerts, 1);
    }

    #[test]
    fn stats_count_active_per_symbol() {
        let engine = AlertEngine::new();
        let owner = ConnectionId::new();
        engine.create_alert(owner, &request("AAPL", dec!(100), "above")).unwrap();
        engine.create_alert(owner, &request("AAPL", dec!(500), "above")).unwrap();
        engine.create_alert(owner, &request("TSLA", dec!(100), "below")).unwrap();

        engine.evaluate(&sym("AAPL"), dec!(150));

        let stats = engine.stats(3);
        assert_eq!(stats.subscriber_count, 3);
        assert_eq!(stats.total_alerts, 3);
        assert_eq!(stats.active_alerts, 2);
        assert_eq!(stats.per_symbol_active_counts["AAPL"], 1);
        assert_eq!(stats.per_symbol_active_counts["TSLA"], 1);
    }

    #[test]
    fn concurrent_evaluation_fires_once() {
        use std::sync::Arc;
        use std::thread;

        let engine = Arc::new(AlertEngine::new());
        engine
            .create_alert(ConnectionId::new(), &request("NVDA", dec!(100), "above"))
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let e = Arc::clone(&engine);
                thread::spawn(move || e.evaluate(&sym("NVDA"), dec!(150)).len())
            })
            .collect();

        let fired: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(fired, 1);
    }

    #[test]
    fn alert_request_parses_camel_case_numbers() {
        let req: AlertRequest = serde_json::from_str(
            r#"{"symbol":"aapl","targetPrice":200.5,"condition":"below"}"#,
        )
        .unwrap();
        assert_eq!(req.target_price, Some(dec!(200.5)));

        let empty: AlertRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, AlertRequest::default());
    }
}
