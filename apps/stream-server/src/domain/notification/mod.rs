//! Notifications
//!
//! Transient messages delivered either to one connection or to every
//! notification subscriber. Never persisted.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::domain::connection::ConnectionId;

/// Notification category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A price alert fired.
    PriceAlert,
    /// General market news.
    MarketNews,
    /// Portfolio-level alert.
    PortfolioAlert,
}

/// Delivery target of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationTarget {
    /// One specific connection.
    Connection(ConnectionId),
    /// Every notification subscriber.
    Broadcast,
}

impl Serialize for NotificationTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Connection(id) => serializer.collect_str(id),
            Self::Broadcast => serializer.serialize_str("broadcast"),
        }
    }
}

/// A notification pushed to clients as the `notification` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Unique id.
    pub id: Uuid,
    /// Category.
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Short title.
    pub title: String,
    /// Human-readable body.
    pub message: String,
    /// Optional structured payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Who receives it.
    pub target: NotificationTarget,
}

impl Notification {
    /// Create a notification without payload.
    #[must_use]
    pub fn new(
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        target: NotificationTarget,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            title: title.into(),
            message: message.into(),
            data: None,
            timestamp: Utc::now(),
            target,
        }
    }

    /// Attach a structured payload.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Market news for every notification subscriber.
    #[must_use]
    pub fn market_news(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            NotificationKind::MarketNews,
            title,
            message,
            NotificationTarget::Broadcast,
        )
    }

    /// Greeting sent when a connection subscribes to notifications.
    #[must_use]
    pub fn welcome(id: ConnectionId) -> Self {
        Self::new(
            NotificationKind::MarketNews,
            "Welcome to Stock Dashboard",
            "You are now subscribed to real-time notifications",
            NotificationTarget::Connection(id),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_type_and_target() {
        let id = ConnectionId::new();
        let json = serde_json::to_value(Notification::welcome(id)).unwrap();

        assert_eq!(json["type"], "market_news");
        assert_eq!(json["target"], id.to_string());
        assert!(json.get("data").is_none());
    }

    #[test]
    fn broadcast_target_serializes_as_literal() {
        let n = Notification::market_news("Fed", "Rates unchanged")
            .with_data(serde_json::json!({"source": "wire"}));
        let json = serde_json::to_value(n).unwrap();

        assert_eq!(json["target"], "broadcast");
        assert_eq!(json["data"]["source"], "wire");
    }
}
