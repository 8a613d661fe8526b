//! Streaming Service
//!
//! Connection lifecycle owner. Admits connections against the per-origin
//! cap, executes client requests against the router, registry and alert
//! engine, and runs the single disconnect cascade.
//!
//! Request replies are returned to the caller, which writes them to the
//! socket. Stream updates arrive separately through the connection's
//! outbox, filled by the [`Dispatcher`].

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::application::services::dispatcher::Dispatcher;
use crate::application::services::portfolio::PortfolioSimulator;
use crate::application::services::router::SubscriptionRouter;
use crate::application::services::scheduler::{SchedulerStats, StreamScheduler};
use crate::domain::alert::{AlertEngine, AlertRequest, AlertStats};
use crate::domain::connection::{ConnectionId, ConnectionRegistry, RegistryStats};
use crate::domain::notification::Notification;
use crate::domain::streaming::{Ack, AlertAck, ClientRequest, ServerEvent, SymbolsAck};
use crate::infrastructure::metrics;

/// Default per-client outbox capacity.
pub const DEFAULT_CLIENT_BUFFER: usize = 256;

/// Connection admission error. `Display` is the message sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    /// The origin already holds the maximum number of connections.
    #[error("Connection limit exceeded")]
    LimitExceeded,
}

/// An admitted connection.
#[derive(Debug)]
pub struct ClientHandle {
    /// Connection id.
    pub id: ConnectionId,
    /// Stream updates and targeted notifications for this connection.
    pub events: mpsc::Receiver<ServerEvent>,
}

/// Combined statistics for the `/stats` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStats {
    /// Connection registry.
    pub connections: RegistryStats,
    /// Alert engine.
    pub alerts: AlertStats,
    /// Stream scheduler.
    pub streams: SchedulerStats,
}

/// Facade over the streaming components.
#[derive(Debug)]
pub struct StreamingService {
    registry: Arc<ConnectionRegistry>,
    alerts: Arc<AlertEngine>,
    scheduler: Arc<StreamScheduler>,
    dispatcher: Arc<Dispatcher>,
    portfolio: Arc<PortfolioSimulator>,
    router: SubscriptionRouter,
    client_buffer: usize,
}

impl StreamingService {
    /// Wire the service over shared components.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        alerts: Arc<AlertEngine>,
        scheduler: Arc<StreamScheduler>,
        dispatcher: Arc<Dispatcher>,
        portfolio: Arc<PortfolioSimulator>,
        client_buffer: usize,
    ) -> Self {
        let router = SubscriptionRouter::new(Arc::clone(&registry), Arc::clone(&scheduler));
        Self {
            registry,
            alerts,
            scheduler,
            dispatcher,
            portfolio,
            router,
            client_buffer: client_buffer.max(1),
        }
    }

    /// Admit a connection from `origin`.
    pub fn connect(&self, origin: &str) -> Result<ClientHandle, ConnectError> {
        let id = ConnectionId::new();
        if !self.registry.add_connection(id, origin) {
            metrics::record_connection_rejected();
            tracing::warn!(
                origin,
                limit = self.registry.max_per_origin(),
                "Connection limit exceeded for origin"
            );
            return Err(ConnectError::LimitExceeded);
        }

        let (tx, rx) = mpsc::channel(self.client_buffer);
        self.dispatcher.attach(id, tx);
        metrics::set_connections(self.registry.connection_count());

        tracing::info!(connection_id = %id, origin, "Client connected");
        Ok(ClientHandle { id, events: rx })
    }

    /// Decode and execute a text frame.
    pub fn handle_text(&self, id: ConnectionId, text: &str) -> Vec<ServerEvent> {
        match ClientRequest::decode(text) {
            Ok(request) => self.handle(id, request),
            Err(e) => {
                tracing::debug!(connection_id = %id, error = ?e, "Rejected client frame");
                vec![ServerEvent::error(e)]
            }
        }
    }

    /// Execute a client request and return the replies for that client.
    pub fn handle(&self, id: ConnectionId, request: ClientRequest) -> Vec<ServerEvent> {
        tracing::debug!(connection_id = %id, event = request.name(), "Client request");

        match request {
            ClientRequest::SubscribeToStocks(values) => {
                let requested = ticker_strings(&values);
                match self.router.subscribe(id, &requested) {
                    Ok(symbols) => vec![ServerEvent::SubscriptionConfirmed(SymbolsAck {
                        message: format!("Subscribed to {} symbols", symbols.len()),
                        symbols,
                    })],
                    Err(e) => vec![ServerEvent::error(e)],
                }
            }
            ClientRequest::UnsubscribeFromStocks(values) => {
                let requested = ticker_strings(&values);
                match self.router.unsubscribe(id, &requested) {
                    Ok(symbols) => vec![ServerEvent::UnsubscriptionConfirmed(SymbolsAck {
                        message: format!("Unsubscribed from {} symbols", symbols.len()),
                        symbols,
                    })],
                    Err(e) => vec![ServerEvent::error(e)],
                }
            }
            ClientRequest::SubscribeToPortfolio => self.subscribe_portfolio(id),
            ClientRequest::UnsubscribeFromPortfolio => {
                self.registry.set_portfolio_subscription(id, false);
                tracing::info!(connection_id = %id, "Client unsubscribed from portfolio");
                vec![ServerEvent::PortfolioUnsubscriptionConfirmed(ack(
                    "Successfully unsubscribed from portfolio updates",
                ))]
            }
            ClientRequest::SubscribeToNotifications => {
                if !self.registry.set_notification_subscription(id, true) {
                    return Vec::new();
                }
                tracing::info!(connection_id = %id, "Client subscribed to notifications");
                vec![
                    ServerEvent::NotificationSubscriptionConfirmed(ack(
                        "Successfully subscribed to notifications",
                    )),
                    ServerEvent::Notification(Notification::welcome(id)),
                ]
            }
            ClientRequest::UnsubscribeFromNotifications => {
                self.registry.set_notification_subscription(id, false);
                tracing::info!(connection_id = %id, "Client unsubscribed from notifications");
                vec![ServerEvent::NotificationUnsubscriptionConfirmed(ack(
                    "Successfully unsubscribed from notifications",
                ))]
            }
            ClientRequest::SetPriceAlert(request) => vec![self.set_price_alert(id, &request)],
            ClientRequest::RemovePriceAlert(alert_id) => {
                match self.alerts.remove_alert(id, &alert_id) {
                    Ok(alert_id) => {
                        tracing::info!(connection_id = %id, alert_id = %alert_id, "Price alert removed");
                        vec![ServerEvent::PriceAlertRemoved(AlertAck {
                            alert_id,
                            message: "Price alert removed successfully".to_string(),
                        })]
                    }
                    Err(e) => vec![ServerEvent::error(e)],
                }
            }
        }
    }

    /// Run the disconnect cascade. Idempotent.
    ///
    /// Releases symbol subscriptions (stopping orphaned streams), deletes
    /// the connection's alerts, removes it from the registry and detaches
    /// its outbox.
    pub fn disconnect(&self, id: ConnectionId) {
        let released = self.router.unsubscribe_all(id);
        let alerts = self.alerts.cleanup(id);
        let removed = self.registry.remove_connection(id);
        self.dispatcher.detach(id);

        if removed.is_some() {
            metrics::set_connections(self.registry.connection_count());
            tracing::info!(
                connection_id = %id,
                symbols = released.len(),
                alerts,
                "Client disconnected"
            );
        }
    }

    /// Send market news to every notification subscriber.
    pub fn broadcast_news(
        &self,
        title: &str,
        message: &str,
        data: Option<serde_json::Value>,
    ) -> usize {
        let mut notification = Notification::market_news(title, message);
        if let Some(data) = data {
            notification = notification.with_data(data);
        }
        let delivered = self.dispatcher.on_notification(&notification);
        tracing::info!(title, delivered, "Market news broadcast");
        delivered
    }

    /// Live connection count.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    /// Combined statistics.
    #[must_use]
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            connections: self.registry.stats(),
            alerts: self.alerts.stats(self.registry.notification_count()),
            streams: self.scheduler.stats(),
        }
    }

    fn subscribe_portfolio(&self, id: ConnectionId) -> Vec<ServerEvent> {
        if !self.registry.set_portfolio_subscription(id, true) {
            return Vec::new();
        }
        tracing::info!(connection_id = %id, "Client subscribed to portfolio");
        vec![
            ServerEvent::PortfolioUpdate(self.portfolio.snapshot()),
            ServerEvent::PortfolioSubscriptionConfirmed(ack(
                "Successfully subscribed to portfolio updates",
            )),
        ]
    }

    fn set_price_alert(&self, id: ConnectionId, request: &AlertRequest) -> ServerEvent {
        match self.alerts.create_alert(id, request) {
            Ok(alert) => {
                tracing::info!(
                    connection_id = %id,
                    alert_id = %alert.id,
                    symbol = %alert.symbol,
                    condition = alert.condition.as_str(),
                    target = %alert.target_price,
                    "Price alert created"
                );
                ServerEvent::PriceAlertCreated(AlertAck {
                    alert_id: alert.id,
                    message: format!(
                        "Price alert set for {} {} ${}",
                        alert.symbol,
                        alert.condition.as_str(),
                        alert.target_price
                    ),
                })
            }
            Err(e) => ServerEvent::error(e),
        }
    }
}

fn ack(message: &str) -> Ack {
    Ack {
        message: message.to_string(),
    }
}

/// Non-string entries become empty strings, which fail validation.
fn ticker_strings(values: &[serde_json::Value]) -> Vec<&str> {
    values
        .iter()
        .map(|value| value.as_str().unwrap_or_default())
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
