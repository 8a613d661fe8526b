//! Streaming Events and Wire Protocol
//!
//! Two families of messages live here:
//!
//! - [`StreamEvent`]: what the scheduler's tasks (symbol streams, the
//!   market overview, the portfolio feed) hand to the dispatcher.
//! - [`ClientRequest`] / [`ServerEvent`]: the JSON frames exchanged with
//!   browser clients, shaped `{"event": <name>, "data": <payload>}`.

use serde::{Deserialize, Serialize};

use crate::domain::alert::{AlertId, AlertRequest};
use crate::domain::market::{MarketIndex, PortfolioSnapshot, Quote, Symbol};
use crate::domain::notification::Notification;

// =============================================================================
// Internal Events
// =============================================================================

/// An update produced by a stream task, consumed by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Fresh quote for one symbol.
    Quote(Quote),
    /// Market overview levels.
    Market(Vec<MarketIndex>),
    /// Portfolio snapshot.
    Portfolio(PortfolioSnapshot),
}

// =============================================================================
// Client → Server
// =============================================================================

/// A request frame sent by a client.
///
/// Symbol lists are kept as raw JSON values so that non-string entries are
/// dropped like any other invalid ticker instead of failing the frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Start receiving quotes for symbols.
    SubscribeToStocks(Vec<serde_json::Value>),
    /// Stop receiving quotes for symbols.
    UnsubscribeFromStocks(Vec<serde_json::Value>),
    /// Start receiving portfolio snapshots.
    SubscribeToPortfolio,
    /// Stop receiving portfolio snapshots.
    UnsubscribeFromPortfolio,
    /// Start receiving broadcast notifications.
    SubscribeToNotifications,
    /// Stop receiving broadcast notifications.
    UnsubscribeFromNotifications,
    /// Create a price alert.
    SetPriceAlert(AlertRequest),
    /// Delete a price alert by id.
    RemovePriceAlert(String),
}

impl ClientRequest {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidFrame(e.to_string()))
    }

    /// Event name, for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SubscribeToStocks(_) => "subscribe_to_stocks",
            Self::UnsubscribeFromStocks(_) => "unsubscribe_from_stocks",
            Self::SubscribeToPortfolio => "subscribe_to_portfolio",
            Self::UnsubscribeFromPortfolio => "unsubscribe_from_portfolio",
            Self::SubscribeToNotifications => "subscribe_to_notifications",
            Self::UnsubscribeFromNotifications => "unsubscribe_from_notifications",
            Self::SetPriceAlert(_) => "set_price_alert",
            Self::RemovePriceAlert(_) => "remove_price_alert",
        }
    }
}

/// Frame decoding error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is not a known event with a well-formed payload.
    #[error("Invalid message format")]
    InvalidFrame(String),
}

// =============================================================================
// Server → Client
// =============================================================================

/// Acknowledgement listing the symbols a request affected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolsAck {
    /// Affected symbols.
    pub symbols: Vec<Symbol>,
    /// Human-readable summary.
    pub message: String,
}

/// Plain acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    /// Human-readable summary.
    pub message: String,
}

/// Acknowledgement for alert creation or removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertAck {
    /// The alert concerned.
    pub alert_id: AlertId,
    /// Human-readable summary.
    pub message: String,
}

/// Error payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    /// Client-facing error text.
    pub message: String,
}

/// A frame pushed to a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Symbols accepted by a subscribe request.
    SubscriptionConfirmed(SymbolsAck),
    /// Symbols removed by an unsubscribe request.
    UnsubscriptionConfirmed(SymbolsAck),
    /// Quote update for a subscribed symbol.
    StockQuote(Quote),
    /// Market overview, sent to every connection.
    MarketOverview(Vec<MarketIndex>),
    /// Portfolio snapshot.
    PortfolioUpdate(PortfolioSnapshot),
    /// Portfolio feed enabled.
    PortfolioSubscriptionConfirmed(Ack),
    /// Portfolio feed disabled.
    PortfolioUnsubscriptionConfirmed(Ack),
    /// Notification feed enabled.
    NotificationSubscriptionConfirmed(Ack),
    /// Notification feed disabled.
    NotificationUnsubscriptionConfirmed(Ack),
    /// A notification.
    Notification(Notification),
    /// Alert stored.
    PriceAlertCreated(AlertAck),
    /// Alert deleted.
    PriceAlertRemoved(AlertAck),
    /// Request failed.
    Error(ErrorPayload),
}

impl ServerEvent {
    /// Build an error frame from anything displayable.
    #[must_use]
    pub fn error(message: impl ToString) -> Self {
        Self::Error(ErrorPayload {
            message: message.to_string(),
        })
    }

    /// Event name, used as the metrics label.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SubscriptionConfirmed(_) => "subscription_confirmed",
            Self::UnsubscriptionConfirmed(_) => "unsubscription_confirmed",
            Self::StockQuote(_) => "stock_quote",
            Self::MarketOverview(_) => "market_overview",
            Self::PortfolioUpdate(_) => "portfolio_update",
            Self::PortfolioSubscriptionConfirmed(_) => "portfolio_subscription_confirmed",
            Self::PortfolioUnsubscriptionConfirmed(_) => "portfolio_unsubscription_confirmed",
            Self::NotificationSubscriptionConfirmed(_) => "notification_subscription_confirmed",
            Self::NotificationUnsubscriptionConfirmed(_) => {
                "notification_unsubscription_confirmed"
            }
            Self::Notification(_) => "notification",
            Self::PriceAlertCreated(_) => "price_alert_created",
            Self::PriceAlertRemoved(_) => "price_alert_removed",
            Self::Error(_) => "error",
        }
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Tests
// =============================================================================
