//! Broadcast Dispatcher
//!
//! Consumes [`StreamEvent`]s from the scheduler and fans them out to client
//! outboxes. Recipient sets come from the connection registry at delivery
//! time, so a connection that left between poll and delivery is skipped.
//!
//! # Delivery
//!
//! Each connection owns a bounded outbox. Delivery uses `try_send` and never
//! waits on a client: a full or closed outbox drops the event and counts it
//! in `stock_stream_events_dropped_total`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::domain::alert::AlertEngine;
use crate::domain::connection::{ConnectionId, ConnectionRegistry};
use crate::domain::market::{MarketIndex, PortfolioSnapshot, Quote};
use crate::domain::notification::{Notification, NotificationTarget};
use crate::domain::streaming::{ServerEvent, StreamEvent};
use crate::infrastructure::metrics;

/// Fans stream events out to connected clients.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    alerts: Arc<AlertEngine>,
    outboxes: RwLock<HashMap<ConnectionId, mpsc::Sender<ServerEvent>>>,
}

impl Dispatcher {
    /// Create a dispatcher over the given registry and alert engine.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, alerts: Arc<AlertEngine>) -> Self {
        Self {
            registry,
            alerts,
            outboxes: RwLock::new(HashMap::new()),
        }
    }

    /// Register the outbox for a connection.
    pub fn attach(&self, id: ConnectionId, outbox: mpsc::Sender<ServerEvent>) {
        self.outboxes.write().insert(id, outbox);
    }

    /// Drop the outbox for a connection. Idempotent.
    pub fn detach(&self, id: ConnectionId) {
        self.outboxes.write().remove(&id);
    }

    /// Number of attached outboxes.
    #[must_use]
    pub fn attached(&self) -> usize {
        self.outboxes.read().len()
    }

    /// Queue one event for one connection. Returns whether it was queued.
    pub fn send_to(&self, id: ConnectionId, event: ServerEvent) -> bool {
        let name = event.name();
        let delivered = self.outboxes.read().get(&id).is_some_and(|outbox| {
            match outbox.try_send(event) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(connection_id = %id, event = name, "Client queue full, dropping event");
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });

        if delivered {
            metrics::record_events_delivered(name, 1);
        } else {
            metrics::record_events_dropped(name, 1);
        }
        delivered
    }

    /// Route one stream event.
    pub fn dispatch(&self, event: StreamEvent) -> usize {
        match event {
            StreamEvent::Quote(quote) => self.on_symbol_update(&quote),
            StreamEvent::Market(indices) => self.on_market_update(&indices),
            StreamEvent::Portfolio(snapshot) => self.on_portfolio_tick(&snapshot),
        }
    }

    /// Deliver a quote to the symbol's subscribers, then evaluate alerts.
    ///
    /// Returns the number of quote deliveries.
    pub fn on_symbol_update(&self, quote: &Quote) -> usize {
        let recipients = self.registry.connections_for_symbol(&quote.symbol);
        let delivered = self.fan_out(&recipients, &ServerEvent::StockQuote(quote.clone()));

        let fired = self.alerts.evaluate(&quote.symbol, quote.price);
        if !fired.is_empty() {
            metrics::record_alerts_triggered(fired.len() as u64);
            for notification in &fired {
                self.on_notification(notification);
            }
        }

        tracing::trace!(
            symbol = %quote.symbol,
            recipients = recipients.len(),
            delivered,
            "Quote dispatched"
        );
        delivered
    }

    /// Deliver the market overview to every connection.
    pub fn on_market_update(&self, indices: &[MarketIndex]) -> usize {
        let recipients: HashSet<_> = self.registry.all_connections().into_iter().collect();
        self.fan_out(&recipients, &ServerEvent::MarketOverview(indices.to_vec()))
    }

    /// Deliver a portfolio snapshot to portfolio subscribers.
    pub fn on_portfolio_tick(&self, snapshot: &PortfolioSnapshot) -> usize {
        let recipients = self.registry.portfolio_subscribers();
        self.fan_out(&recipients, &ServerEvent::PortfolioUpdate(snapshot.clone()))
    }

    /// Deliver a notification to its target, or to every notification
    /// subscriber when broadcast.
    pub fn on_notification(&self, notification: &Notification) -> usize {
        let event = ServerEvent::Notification(notification.clone());
        match notification.target {
            NotificationTarget::Connection(id) => usize::from(self.send_to(id, event)),
            NotificationTarget::Broadcast => {
                let recipients = self.registry.notification_subscribers();
                self.fan_out(&recipients, &event)
            }
        }
    }

    /// Consume stream events until the channel closes or `shutdown` fires.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<StreamEvent>,
        shutdown: CancellationToken,
    ) {
        tracing::info!("Dispatcher started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        self.dispatch(event);
                    }
                    None => break,
                },
            }
        }
        tracing::info!("Dispatcher stopped");
    }

    fn fan_out(&self, recipients: &HashSet<ConnectionId>, event: &ServerEvent) -> usize {
        if recipients.is_empty() {
            return 0;
        }

        let name = event.name();
        let mut delivered = 0_u64;
        let mut dropped = 0_u64;
        {
            let outboxes = self.outboxes.read();
            for id in recipients {
                let queued = outboxes
                    .get(id)
                    .is_some_and(|outbox| outbox.try_send(event.clone()).is_ok());
                if queued {
                    delivered += 1;
                } else {
                    dropped += 1;
                }
            }
        }

        if dropped > 0 {
            tracing::debug!(event = name, dropped, "Events dropped for slow or closed clients");
            metrics::record_events_dropped(name, dropped);
        }
        metrics::record_events_delivered(name, delivered);

        usize::try_from(delivered).unwrap_or(usize::MAX)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::alert::AlertRequest;
    use crate::domain::market::Symbol;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        alerts: Arc<AlertEngine>,
        dispatcher: Arc<Dispatcher>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(ConnectionRegistry::default());
        let alerts = Arc::new(AlertEngine::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry), Arc::clone(&alerts)));
        Fixture {
            registry,
            alerts,
            dispatcher,
        }
    }

    fn connect(f: &Fixture, capacity: usize) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let id = ConnectionId::new();
        assert!(f.registry.add_connection(id, "10.0.0.1"));
        let (tx, rx) = mpsc::channel(capacity);
        f.dispatcher.attach(id, tx);
        (id, rx)
    }

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn quote(s: &str, price: Decimal) -> Quote {
        Quote::from_previous_close(sym(s), price, dec!(195), 1_000)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn quote_reaches_exactly_the_subscribers() {
        let f = fixture();
        let mut subscribed = Vec::new();
        for _ in 0..3 {
            let (id, rx) = connect(&f, 8);
            f.registry.set_symbol_subscription(id, &sym("AAPL"), true);
            subscribed.push(rx);
        }
        let (_other, mut other_rx) = connect(&f, 8);

        let delivered = f.dispatcher.on_symbol_update(&quote("AAPL", dec!(190)));

        assert_eq!(delivered, 3);
        for rx in &mut subscribed {
            let events = drain(rx);
            assert_eq!(events.len(), 1);
            assert!(matches!(&events[0], ServerEvent::StockQuote(q) if q.symbol == sym("AAPL")));
        }
        assert!(drain(&mut other_rx).is_empty());
    }

    #[test]
    fn quote_without_subscribers_is_silent() {
        let f = fixture();
        let (_id, mut rx) = connect(&f, 8);

        assert_eq!(f.dispatcher.on_symbol_update(&quote("TSLA", dec!(250))), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn market_update_reaches_every_connection() {
        let f = fixture();
        let (_a, mut rx_a) = connect(&f, 8);
        let (_b, mut rx_b) = connect(&f, 8);

        let indices = vec![MarketIndex {
            name: "S&P 500".to_string(),
            symbol: "GSPC".to_string(),
            value: dec!(5000),
            change: dec!(10),
            change_percent: dec!(0.2),
            timestamp: Utc::now(),
        }];

        assert_eq!(f.dispatcher.dispatch(StreamEvent::Market(indices)), 2);
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[test]
    fn portfolio_tick_only_reaches_portfolio_subscribers() {
        let f = fixture();
        let (a, mut rx_a) = connect(&f, 8);
        let (_b, mut rx_b) = connect(&f, 8);
        f.registry.set_portfolio_subscription(a, true);

        let snapshot = PortfolioSnapshot {
            total_value: dec!(100),
            day_change: dec!(1),
            day_change_percent: dec!(1),
            total_gain: dec!(0),
            total_gain_percent: dec!(0),
            holdings: Vec::new(),
            last_updated: Utc::now(),
        };

        assert_eq!(f.dispatcher.on_portfolio_tick(&snapshot), 1);
        assert!(matches!(drain(&mut rx_a)[..], [ServerEvent::PortfolioUpdate(_)]));
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn broadcast_notification_reaches_notification_subscribers() {
        let f = fixture();
        let (a, mut rx_a) = connect(&f, 8);
        let (_b, mut rx_b) = connect(&f, 8);
        f.registry.set_notification_subscription(a, true);

        let delivered = f
            .dispatcher
            .on_notification(&Notification::market_news("Fed", "Rates unchanged"));

        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn targeted_notification_ignores_subscription_flag() {
        let f = fixture();
        let (a, mut rx_a) = connect(&f, 8);

        assert_eq!(f.dispatcher.on_notification(&Notification::welcome(a)), 1);
        assert_eq!(drain(&mut rx_a).len(), 1);
    }

    #[test]
    fn alert_fires_once_to_its_owner() {
        let f = fixture();
        let (a, mut rx_a) = connect(&f, 8);
        f.registry.set_symbol_subscription(a, &sym("AAPL"), true);
        f.alerts
            .create_alert(
                a,
                &AlertRequest {
                    symbol: Some("AAPL".to_string()),
                    target_price: Some(dec!(200)),
                    condition: Some("above".to_string()),
                },
            )
            .unwrap();

        f.dispatcher.on_symbol_update(&quote("AAPL", dec!(199)));
        let events = drain(&mut rx_a);
        assert_eq!(events.len(), 1);

        f.dispatcher.on_symbol_update(&quote("AAPL", dec!(201)));
        let events = drain(&mut rx_a);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], ServerEvent::Notification(n) if n.target == NotificationTarget::Connection(a)));

        f.dispatcher.on_symbol_update(&quote("AAPL", dec!(205)));
        assert_eq!(drain(&mut rx_a).len(), 1);
    }

    #[test]
    fn full_outbox_drops_without_blocking() {
        let f = fixture();
        let (a, mut rx_a) = connect(&f, 1);
        f.registry.set_symbol_subscription(a, &sym("AAPL"), true);

        assert_eq!(f.dispatcher.on_symbol_update(&quote("AAPL", dec!(1))), 1);
        assert_eq!(f.dispatcher.on_symbol_update(&quote("AAPL", dec!(2))), 0);
        assert_eq!(drain(&mut rx_a).len(), 1);
    }

    #[test]
    fn detached_connection_receives_nothing() {
        let f = fixture();
        let (a, mut rx_a) = connect(&f, 8);
        f.dispatcher.detach(a);
        f.dispatcher.detach(a);

        assert_eq!(f.dispatcher.attached(), 0);
        assert!(!f.dispatcher.send_to(a, ServerEvent::error("gone")));
        assert_eq!(f.dispatcher.on_market_update(&[]), 0);
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn run_consumes_until_channel_closes() {
        let f = fixture();
        let (a, mut rx_a) = connect(&f, 8);
        f.registry.set_symbol_subscription(a, &sym("MSFT"), true);

        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(Arc::clone(&f.dispatcher).run(rx, CancellationToken::new()));

        tx.send(StreamEvent::Quote(quote("MSFT", dec!(410)))).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert!(matches!(drain(&mut rx_a)[..], [ServerEvent::StockQuote(_)]));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let f = fixture();
        let (_tx, rx) = mpsc::channel::<StreamEvent>(8);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&f.dispatcher).run(rx, shutdown.clone()));

        shutdown.cancel();
        task.await.unwrap();
    }
}
