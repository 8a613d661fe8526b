//! Subscription Router
//!
//! Turns client subscribe/unsubscribe requests into registry mutations and
//! scheduler start/stop actions. Many connections subscribed to one symbol
//! share a single upstream poll; the poll starts with the first subscriber
//! and stops with the last.
//!
//! Registry mutation and the matching scheduler action happen under one
//! transition lock, so a racing subscribe and unsubscribe for the same
//! symbol cannot leave a subscribed symbol without a running task (or a
//! running task with no subscribers).

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::application::services::scheduler::StreamScheduler;
use crate::domain::connection::{ConnectionId, ConnectionRegistry, SymbolChange};
use crate::domain::market::Symbol;

/// Subscription request errors. `Display` is the message sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// The request carried no symbols at all.
    #[error("Invalid symbols array")]
    EmptyRequest,
    /// Every requested symbol failed validation.
    #[error("No valid symbols provided")]
    NoValidSymbols,
    /// The connection holds no symbol subscriptions.
    #[error("No active subscriptions found")]
    NoActiveSubscriptions,
}

/// Routes subscription changes to the registry and scheduler.
#[derive(Debug)]
pub struct SubscriptionRouter {
    registry: Arc<ConnectionRegistry>,
    scheduler: Arc<StreamScheduler>,
    transitions: Mutex<()>,
}

impl SubscriptionRouter {
    /// Create a router.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, scheduler: Arc<StreamScheduler>) -> Self {
        Self {
            registry,
            scheduler,
            transitions: Mutex::new(()),
        }
    }

    /// Subscribe a connection to symbols.
    ///
    /// Invalid entries are dropped silently. Returns every valid requested
    /// symbol (deduplicated, request order), including ones the connection
    /// already held.
    pub fn subscribe<S: AsRef<str>>(
        &self,
        id: ConnectionId,
        requested: &[S],
    ) -> Result<Vec<Symbol>, SubscriptionError> {
        if requested.is_empty() {
            return Err(SubscriptionError::EmptyRequest);
        }

        let symbols = valid_symbols(requested);
        if symbols.is_empty() {
            return Err(SubscriptionError::NoValidSymbols);
        }

        let _transition = self.transitions.lock();
        for symbol in &symbols {
            let change = self.registry.set_symbol_subscription(id, symbol, true);
            if change.needs_start() {
                self.scheduler.start(symbol);
            }
        }

        tracing::info!(
            connection_id = %id,
            symbols = %join(&symbols),
            "Client subscribed to stocks"
        );
        Ok(symbols)
    }

    /// Unsubscribe a connection from symbols.
    ///
    /// Returns only the symbols that were actually removed. Stops the
    /// upstream poll for every symbol left without subscribers.
    pub fn unsubscribe<S: AsRef<str>>(
        &self,
        id: ConnectionId,
        requested: &[S],
    ) -> Result<Vec<Symbol>, SubscriptionError> {
        if requested.is_empty() {
            return Err(SubscriptionError::EmptyRequest);
        }

        let held = self.registry.symbols_for(id).unwrap_or_default();
        if held.is_empty() {
            return Err(SubscriptionError::NoActiveSubscriptions);
        }

        let removed = self.remove(id, &valid_symbols(requested));

        tracing::info!(
            connection_id = %id,
            symbols = %join(&removed),
            "Client unsubscribed from stocks"
        );
        Ok(removed)
    }

    /// Unsubscribe a connection from every symbol it holds.
    pub fn unsubscribe_all(&self, id: ConnectionId) -> Vec<Symbol> {
        let held = self.registry.symbols_for(id).unwrap_or_default();
        if held.is_empty() {
            return held;
        }

        let removed = self.remove(id, &held);
        tracing::debug!(
            connection_id = %id,
            count = removed.len(),
            "Released all symbol subscriptions"
        );
        removed
    }

    fn remove(&self, id: ConnectionId, symbols: &[Symbol]) -> Vec<Symbol> {
        let _transition = self.transitions.lock();
        symbols
            .iter()
            .filter(|symbol| {
                let change = self.registry.set_symbol_subscription(id, symbol, false);
                if change.needs_stop() {
                    self.scheduler.stop(symbol);
                }
                change != SymbolChange::Unchanged
            })
            .cloned()
            .collect()
    }
}

/// Normalize and deduplicate requested tickers, keeping request order.
fn valid_symbols<S: AsRef<str>>(requested: &[S]) -> Vec<Symbol> {
    let mut seen = HashSet::new();
    requested
        .iter()
        .filter_map(|raw| Symbol::normalize(raw.as_ref()).ok())
        .filter(|symbol| seen.insert(symbol.clone()))
        .collect()
}

fn join(symbols: &[Symbol]) -> String {
    symbols
        .iter()
        .map(Symbol::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockQuoteSource;
    use crate::application::services::scheduler::SchedulerConfig;
    use crate::domain::market::Quote;
    use crate::domain::streaming::StreamEvent;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        registry: Arc<ConnectionRegistry>,
        scheduler: Arc<StreamScheduler>,
        router: SubscriptionRouter,
        events: mpsc::Receiver<StreamEvent>,
    }

    fn fixture() -> Fixture {
        let mut source = MockQuoteSource::new();
        source.expect_get_quote().returning(|s| {
            Ok(Some(Quote::from_previous_close(s.clone(), dec!(1), dec!(1), 0)))
        });
        let (tx, rx) = mpsc::channel(1024);

        let registry = Arc::new(ConnectionRegistry::default());
        let scheduler = Arc::new(StreamScheduler::new(
            Arc::new(source),
            tx,
            SchedulerConfig::default(),
            CancellationToken::new(),
        ));
        let router = SubscriptionRouter::new(Arc::clone(&registry), Arc::clone(&scheduler));
        Fixture {
            registry,
            scheduler,
            router,
            events: rx,
        }
    }

    fn connect(f: &Fixture) -> ConnectionId {
        let id = ConnectionId::new();
        assert!(f.registry.add_connection(id, "127.0.0.1"));
        id
    }

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    #[tokio::test]
    async fn subscribe_filters_invalid_and_dedupes() {
        let f = fixture();
        let a = connect(&f);

        let accepted = f
            .router
            .subscribe(a, &["aapl", "aapl1", "MSFT", "AAPL", "TOOLONGTICKER", ""])
            .unwrap();

        assert_eq!(accepted, vec![sym("AAPL"), sym("MSFT")]);
        assert_eq!(f.scheduler.active_symbols(), vec![sym("AAPL"), sym("MSFT")]);
    }

    #[tokio::test]
    async fn subscribed_symbol_streams_into_the_event_channel() {
        let mut f = fixture();
        let a = connect(&f);

        f.router.subscribe(a, &["AAPL"]).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), f.events.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(StreamEvent::Quote(q)) if q.symbol == sym("AAPL")));
    }

    #[tokio::test]
    async fn subscribe_errors_leave_state_untouched() {
        let f = fixture();
        let a = connect(&f);

        let empty: [&str; 0] = [];
        assert_eq!(
            f.router.subscribe(a, &empty),
            Err(SubscriptionError::EmptyRequest)
        );
        assert_eq!(
            f.router.subscribe(a, &["123", "lower1"]),
            Err(SubscriptionError::NoValidSymbols)
        );
        assert!(f.registry.symbols_for(a).unwrap().is_empty());
        assert!(f.scheduler.active_symbols().is_empty());
    }

    #[tokio::test]
    async fn shared_symbol_lifecycle() {
        let f = fixture();
        let a = connect(&f);
        let b = connect(&f);

        f.router.subscribe(a, &["AAPL", "MSFT"]).unwrap();
        assert!(f.scheduler.is_running(&sym("AAPL")));
        assert!(f.scheduler.is_running(&sym("MSFT")));

        f.router.subscribe(b, &["AAPL"]).unwrap();
        assert_eq!(f.scheduler.active_symbols().len(), 2);

        assert_eq!(f.router.unsubscribe(a, &["AAPL"]).unwrap(), vec![sym("AAPL")]);
        assert!(f.scheduler.is_running(&sym("AAPL")));

        f.router.unsubscribe(b, &["AAPL"]).unwrap();
        assert!(!f.scheduler.is_running(&sym("AAPL")));
        assert!(f.scheduler.is_running(&sym("MSFT")));
    }

    #[tokio::test]
    async fn resubscribe_does_not_duplicate() {
        let f = fixture();
        let a = connect(&f);

        f.router.subscribe(a, &["NVDA"]).unwrap();
        let again = f.router.subscribe(a, &["NVDA"]).unwrap();

        assert_eq!(again, vec![sym("NVDA")]);
        assert_eq!(f.registry.symbols_for(a).unwrap().len(), 1);
        assert_eq!(f.scheduler.active_symbols(), vec![sym("NVDA")]);
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe_leaves_nothing_running() {
        let f = fixture();
        let a = connect(&f);

        f.router.subscribe(a, &["AAPL", "TSLA", "F"]).unwrap();
        f.router.unsubscribe(a, &["AAPL", "TSLA", "F"]).unwrap();

        for s in ["AAPL", "TSLA", "F"] {
            assert_eq!(f.registry.subscriber_count(&sym(s)), 0);
            assert!(!f.scheduler.is_running(&sym(s)));
        }
    }

    #[tokio::test]
    async fn unsubscribe_without_subscriptions_errors() {
        let f = fixture();
        let a = connect(&f);

        assert_eq!(
            f.router.unsubscribe(a, &["AAPL"]),
            Err(SubscriptionError::NoActiveSubscriptions)
        );
        assert_eq!(
            f.router.unsubscribe(ConnectionId::new(), &["AAPL"]),
            Err(SubscriptionError::NoActiveSubscriptions)
        );
    }

    #[tokio::test]
    async fn unsubscribe_reports_only_removed_symbols() {
        let f = fixture();
        let a = connect(&f);

        f.router.subscribe(a, &["AAPL"]).unwrap();
        let removed = f.router.unsubscribe(a, &["AAPL", "MSFT", "bad1"]).unwrap();

        assert_eq!(removed, vec![sym("AAPL")]);
    }

    #[tokio::test]
    async fn unsubscribe_all_releases_every_symbol() {
        let f = fixture();
        let a = connect(&f);
        let b = connect(&f);

        f.router.subscribe(a, &["AAPL", "MSFT"]).unwrap();
        f.router.subscribe(b, &["MSFT"]).unwrap();

        let mut removed = f.router.unsubscribe_all(a);
        removed.sort();

        assert_eq!(removed, vec![sym("AAPL"), sym("MSFT")]);
        assert!(!f.scheduler.is_running(&sym("AAPL")));
        assert!(f.scheduler.is_running(&sym("MSFT")));
        assert!(f.router.unsubscribe_all(a).is_empty());
    }

    #[test]
    fn error_messages_are_client_facing() {
        assert_eq!(
            SubscriptionError::EmptyRequest.to_string(),
            "Invalid symbols array"
        );
        assert_eq!(
            SubscriptionError::NoValidSymbols.to_string(),
            "No valid symbols provided"
        );
        assert_eq!(
            SubscriptionError::NoActiveSubscriptions.to_string(),
            "No active subscriptions found"
        );
    }
}
