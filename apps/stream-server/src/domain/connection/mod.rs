//! Connection Registry
//!
//! Tracks every live client connection, its origin address, and its
//! subscription state, and enforces the per-origin connection cap.
//!
//! # Design
//!
//! The registry keeps, under one lock:
//! - The connection table (id → `ClientConnection`)
//! - Per-origin connection counts
//! - A reverse index from symbol to subscribed connection ids
//! - The portfolio and notification subscriber sets
//!
//! Symbol subscription changes report whether the symbol gained its first
//! subscriber or lost its last one, so callers can start and stop the
//! upstream poll for that symbol without a second lookup.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::market::Symbol;

// =============================================================================
// Types
// =============================================================================

/// Default maximum number of concurrent connections per origin address.
pub const DEFAULT_MAX_CONNECTIONS_PER_ORIGIN: usize = 50;

/// Opaque identifier for a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A live client connection and its subscription state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConnection {
    /// Connection id.
    pub id: ConnectionId,
    /// Origin address the connection came from.
    pub origin: String,
    /// When the connection was accepted.
    pub connected_at: DateTime<Utc>,
    /// Symbols this connection receives quotes for.
    pub symbols: HashSet<Symbol>,
    /// Whether this connection receives portfolio snapshots.
    pub portfolio: bool,
    /// Whether this connection receives broadcast notifications.
    pub notifications: bool,
}

impl ClientConnection {
    fn new(id: ConnectionId, origin: String) -> Self {
        Self {
            id,
            origin,
            connected_at: Utc::now(),
            symbols: HashSet::new(),
            portfolio: false,
            notifications: false,
        }
    }
}

// =============================================================================
// Subscription Changes
// =============================================================================

/// Outcome of toggling one symbol for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolChange {
    /// Nothing changed (unknown connection, or already in the requested state).
    Unchanged,
    /// The connection joined the symbol's subscriber set.
    Joined {
        /// The symbol had no subscribers before.
        first: bool,
    },
    /// The connection left the symbol's subscriber set.
    Left {
        /// The symbol has no subscribers now.
        last: bool,
    },
}

impl SymbolChange {
    /// The symbol's subscriber count went 0 → 1.
    #[must_use]
    pub const fn needs_start(self) -> bool {
        matches!(self, Self::Joined { first: true })
    }

    /// The symbol's subscriber count went 1 → 0.
    #[must_use]
    pub const fn needs_stop(self) -> bool {
        matches!(self, Self::Left { last: true })
    }
}

// =============================================================================
// Registry State
// =============================================================================

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, ClientConnection>,
    origins: HashMap<String, usize>,
    symbol_index: HashMap<Symbol, HashSet<ConnectionId>>,
    portfolio: HashSet<ConnectionId>,
    notifications: HashSet<ConnectionId>,
}

impl RegistryState {
    fn join_symbol(&mut self, id: ConnectionId, symbol: &Symbol) -> SymbolChange {
        let Some(connection) = self.connections.get_mut(&id) else {
            return SymbolChange::Unchanged;
        };

        if !connection.symbols.insert(symbol.clone()) {
            return SymbolChange::Unchanged;
        }

        let subscribers = self.symbol_index.entry(symbol.clone()).or_default();
        subscribers.insert(id);

        SymbolChange::Joined {
            first: subscribers.len() == 1,
        }
    }

    fn leave_symbol(&mut self, id: ConnectionId, symbol: &Symbol) -> SymbolChange {
        let Some(connection) = self.connections.get_mut(&id) else {
            return SymbolChange::Unchanged;
        };

        if !connection.symbols.remove(symbol) {
            return SymbolChange::Unchanged;
        }

        let last = self.symbol_index.get_mut(symbol).is_none_or(|subscribers| {
            subscribers.remove(&id);
            subscribers.is_empty()
        });

        if last {
            self.symbol_index.remove(symbol);
        }

        SymbolChange::Left { last }
    }

    fn release_origin(&mut self, origin: &str) {
        if let Some(count) = self.origins.get_mut(origin) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.origins.remove(origin);
            }
        }
    }
}

// =============================================================================
// Connection Registry
// =============================================================================

/// Thread-safe registry of live connections.
///
/// # Example
///
/// ```rust
/// use stock_stream_server::domain::connection::{ConnectionId, ConnectionRegistry};
/// use stock_stream_server::domain::market::Symbol;
///
/// let registry = ConnectionRegistry::new(2);
/// let a = ConnectionId::new();
/// let b = ConnectionId::new();
/// assert!(registry.add_connection(a, "10.0.0.1"));
/// assert!(registry.add_connection(b, "10.0.0.1"));
/// assert!(!registry.add_connection(ConnectionId::new(), "10.0.0.1"));
///
/// let aapl = Symbol::parse("AAPL").unwrap();
/// assert!(registry.set_symbol_subscription(a, &aapl, true).needs_start());
/// assert!(!registry.set_symbol_subscription(b, &aapl, true).needs_start());
/// assert!(!registry.set_symbol_subscription(a, &aapl, false).needs_stop());
/// assert!(registry.set_symbol_subscription(b, &aapl, false).needs_stop());
/// ```
#[derive(Debug)]
pub struct ConnectionRegistry {
    max_per_origin: usize,
    state: RwLock<RegistryState>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONNECTIONS_PER_ORIGIN)
    }
}

impl ConnectionRegistry {
    /// Create a registry with the given per-origin cap.
    #[must_use]
    pub fn new(max_per_origin: usize) -> Self {
        Self {
            max_per_origin,
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Per-origin connection cap.
    #[must_use]
    pub const fn max_per_origin(&self) -> usize {
        self.max_per_origin
    }

    /// Register a connection.
    ///
    /// Returns `false` without registering anything when the origin already
    /// holds the maximum number of connections, or when the id is already
    /// registered. The caller must refuse the connection in that case.
    #[must_use]
    pub fn add_connection(&self, id: ConnectionId, origin: &str) -> bool {
        let mut state = self.state.write();

        if state.connections.contains_key(&id) {
            return false;
        }

        let count = state.origins.get(origin).copied().unwrap_or(0);
        if count >= self.max_per_origin {
            return false;
        }

        state.origins.insert(origin.to_string(), count + 1);
        state
            .connections
            .insert(id, ClientConnection::new(id, origin.to_string()));
        true
    }

    /// Remove a connection and every reference to it.
    ///
    /// Idempotent. Returns the removed record, if there was one.
    pub fn remove_connection(&self, id: ConnectionId) -> Option<ClientConnection> {
        let mut state = self.state.write();
        let connection = state.connections.remove(&id)?;

        for symbol in &connection.symbols {
            if let Some(subscribers) = state.symbol_index.get_mut(symbol) {
                subscribers.remove(&id);
                if subscribers.is_empty() {
                    state.symbol_index.remove(symbol);
                }
            }
        }
        state.portfolio.remove(&id);
        state.notifications.remove(&id);
        state.release_origin(&connection.origin);

        Some(connection)
    }

    /// Subscribe or unsubscribe a connection to one symbol.
    ///
    /// No-op for unknown connections.
    pub fn set_symbol_subscription(&self, id: ConnectionId, symbol: &Symbol, on: bool) -> SymbolChange {
        let mut state = self.state.write();
        if on {
            state.join_symbol(id, symbol)
        } else {
            state.leave_symbol(id, symbol)
        }
    }

    /// Toggle the portfolio feed for a connection.
    ///
    /// Returns `true` if the flag changed.
    pub fn set_portfolio_subscription(&self, id: ConnectionId, on: bool) -> bool {
        let mut state = self.state.write();
        let Some(connection) = state.connections.get_mut(&id) else {
            return false;
        };
        if connection.portfolio == on {
            return false;
        }
        connection.portfolio = on;

        if on {
            state.portfolio.insert(id);
        } else {
            state.portfolio.remove(&id);
        }
        true
    }

    /// Toggle the notification feed for a connection.
    ///
    /// Returns `true` if the flag changed.
    pub fn set_notification_subscription(&self, id: ConnectionId, on: bool) -> bool {
        let mut state = self.state.write();
        let Some(connection) = state.connections.get_mut(&id) else {
            return false;
        };
        if connection.notifications == on {
            return false;
        }
        connection.notifications = on;

        if on {
            state.notifications.insert(id);
        } else {
            state.notifications.remove(&id);
        }
        true
    }

    /// Connections subscribed to a symbol.
    #[must_use]
    pub fn connections_for_symbol(&self, symbol: &Symbol) -> HashSet<ConnectionId> {
        self.state
            .read()
            .symbol_index
            .get(symbol)
            .cloned()
            .unwrap_or_default()
    }

    /// Connections subscribed to the portfolio feed.
    #[must_use]
    pub fn portfolio_subscribers(&self) -> HashSet<ConnectionId> {
        self.state.read().portfolio.clone()
    }

    /// Connections subscribed to broadcast notifications.
    #[must_use]
    pub fn notification_subscribers(&self) -> HashSet<ConnectionId> {
        self.state.read().notifications.clone()
    }

    /// Every live connection.
    #[must_use]
    pub fn all_connections(&self) -> Vec<ConnectionId> {
        self.state.read().connections.keys().copied().collect()
    }

    /// Symbols held by one connection, or `None` if it is unknown.
    #[must_use]
    pub fn symbols_for(&self, id: ConnectionId) -> Option<Vec<Symbol>> {
        self.state
            .read()
            .connections
            .get(&id)
            .map(|c| c.symbols.iter().cloned().collect())
    }

    /// Snapshot of one connection.
    #[must_use]
    pub fn connection(&self, id: ConnectionId) -> Option<ClientConnection> {
        self.state.read().connections.get(&id).cloned()
    }

    /// Whether a connection is registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.state.read().connections.contains_key(&id)
    }

    /// Number of subscribers for a symbol.
    #[must_use]
    pub fn subscriber_count(&self, symbol: &Symbol) -> usize {
        self.state.read().symbol_index.get(symbol).map_or(0, HashSet::len)
    }

    /// Number of live connections from an origin.
    #[must_use]
    pub fn origin_count(&self, origin: &str) -> usize {
        self.state.read().origins.get(origin).copied().unwrap_or(0)
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }

    /// Number of portfolio subscribers.
    #[must_use]
    pub fn portfolio_count(&self) -> usize {
        self.state.read().portfolio.len()
    }

    /// Number of notification subscribers.
    #[must_use]
    pub fn notification_count(&self) -> usize {
        self.state.read().notifications.len()
    }

    /// Observability snapshot.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let state = self.state.read();
        RegistryStats {
            total_connections: state.connections.len(),
            unique_origins: state.origins.len(),
            per_origin_counts: state
                .origins
                .iter()
                .map(|(origin, count)| (origin.clone(), *count))
                .collect(),
            per_symbol_subscriber_counts: state
                .symbol_index
                .iter()
                .map(|(symbol, ids)| (symbol.to_string(), ids.len()))
                .collect(),
            portfolio_count: state.portfolio.len(),
            notification_count: state.notifications.len(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    /// Live connections.
    pub total_connections: usize,
    /// Distinct origin addresses.
    pub unique_origins: usize,
    /// Connections per origin.
    pub per_origin_counts: BTreeMap<String, usize>,
    /// Subscribers per symbol.
    pub per_symbol_subscriber_counts: BTreeMap<String, usize>,
    /// Portfolio subscribers.
    pub portfolio_count: usize,
    /// Notification subscribers.
    pub notification_count: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn registry_with(origin: &str, n: usize) -> (ConnectionRegistry, Vec<ConnectionId>) {
        let registry = ConnectionRegistry::default();
        let ids: Vec<_> = (0..n).map(|_| ConnectionId::new()).collect();
        for id in &ids {
            assert!(registry.add_connection(*id, origin));
        }
        (registry, ids)
    }

    #[test]
    fn add_connection_starts_with_empty_state() {
        let (registry, ids) = registry_with("1.1.1.1", 1);
        let connection = registry.connection(ids[0]).unwrap();

        assert_eq!(connection.origin, "1.1.1.1");
        assert!(connection.symbols.is_empty());
        assert!(!connection.portfolio);
        assert!(!connection.notifications);
        assert_eq!(registry.origin_count("1.1.1.1"), 1);
    }

    #[test]
    fn connection_cap_rejects_fifty_first() {
        let (registry, _) = registry_with("9.9.9.9", 50);

        assert!(!registry.add_connection(ConnectionId::new(), "9.9.9.9"));
        assert_eq!(registry.origin_count("9.9.9.9"), 50);
        assert_eq!(registry.connection_count(), 50);
    }

    #[test]
    fn connection_cap_is_per_origin() {
        let registry = ConnectionRegistry::new(1);

        assert!(registry.add_connection(ConnectionId::new(), "a"));
        assert!(!registry.add_connection(ConnectionId::new(), "a"));
        assert!(registry.add_connection(ConnectionId::new(), "b"));
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let (registry, ids) = registry_with("a", 1);
        assert!(!registry.add_connection(ids[0], "a"));
        assert_eq!(registry.origin_count("a"), 1);
    }

    #[test]
    fn remove_connection_drops_empty_origin_entry() {
        let (registry, ids) = registry_with("2.2.2.2", 2);

        registry.remove_connection(ids[0]);
        assert_eq!(registry.origin_count("2.2.2.2"), 1);

        registry.remove_connection(ids[1]);
        assert_eq!(registry.origin_count("2.2.2.2"), 0);
        assert_eq!(registry.stats().unique_origins, 0);
    }

    #[test]
    fn remove_connection_is_idempotent() {
        let (registry, ids) = registry_with("a", 2);

        assert!(registry.remove_connection(ids[0]).is_some());
        assert!(registry.remove_connection(ids[0]).is_none());
        assert_eq!(registry.origin_count("a"), 1);
    }

    #[test]
    fn first_and_last_subscriber_transitions() {
        let (registry, ids) = registry_with("a", 2);
        let aapl = sym("AAPL");

        assert_eq!(
            registry.set_symbol_subscription(ids[0], &aapl, true),
            SymbolChange::Joined { first: true }
        );
        assert_eq!(
            registry.set_symbol_subscription(ids[1], &aapl, true),
            SymbolChange::Joined { first: false }
        );
        assert_eq!(
            registry.set_symbol_subscription(ids[0], &aapl, false),
            SymbolChange::Left { last: false }
        );
        assert_eq!(
            registry.set_symbol_subscription(ids[1], &aapl, false),
            SymbolChange::Left { last: true }
        );
        assert_eq!(registry.subscriber_count(&aapl), 0);
    }

    #[test]
    fn resubscribe_is_noop() {
        let (registry, ids) = registry_with("a", 1);
        let aapl = sym("AAPL");

        registry.set_symbol_subscription(ids[0], &aapl, true);
        let change = registry.set_symbol_subscription(ids[0], &aapl, true);

        assert_eq!(change, SymbolChange::Unchanged);
        assert_eq!(registry.symbols_for(ids[0]).unwrap().len(), 1);
        assert_eq!(registry.subscriber_count(&aapl), 1);
    }

    #[test]
    fn unknown_connection_mutations_are_noops() {
        let registry = ConnectionRegistry::default();
        let ghost = ConnectionId::new();

        assert_eq!(
            registry.set_symbol_subscription(ghost, &sym("AAPL"), true),
            SymbolChange::Unchanged
        );
        assert!(!registry.set_portfolio_subscription(ghost, true));
        assert!(!registry.set_notification_subscription(ghost, true));
        assert!(registry.connections_for_symbol(&sym("AAPL")).is_empty());
        assert!(registry.portfolio_subscribers().is_empty());
    }

    #[test]
    fn leaving_unsubscribed_symbol_is_noop() {
        let (registry, ids) = registry_with("a", 1);
        assert_eq!(
            registry.set_symbol_subscription(ids[0], &sym("MSFT"), false),
            SymbolChange::Unchanged
        );
    }

    #[test]
    fn feed_flags_toggle_once() {
        let (registry, ids) = registry_with("a", 1);

        assert!(registry.set_portfolio_subscription(ids[0], true));
        assert!(!registry.set_portfolio_subscription(ids[0], true));
        assert!(registry.portfolio_subscribers().contains(&ids[0]));

        assert!(registry.set_notification_subscription(ids[0], true));
        assert!(registry.notification_subscribers().contains(&ids[0]));

        assert!(registry.set_portfolio_subscription(ids[0], false));
        assert!(registry.portfolio_subscribers().is_empty());
    }

    #[test]
    fn remove_connection_cascades_everywhere() {
        let (registry, ids) = registry_with("a", 2);
        let gone = ids[0];

        registry.set_symbol_subscription(gone, &sym("AAPL"), true);
        registry.set_symbol_subscription(gone, &sym("MSFT"), true);
        registry.set_symbol_subscription(ids[1], &sym("MSFT"), true);
        registry.set_portfolio_subscription(gone, true);
        registry.set_notification_subscription(gone, true);

        registry.remove_connection(gone);

        assert!(!registry.contains(gone));
        assert!(registry.connections_for_symbol(&sym("AAPL")).is_empty());
        assert!(!registry.connections_for_symbol(&sym("MSFT")).contains(&gone));
        assert!(!registry.portfolio_subscribers().contains(&gone));
        assert!(!registry.notification_subscribers().contains(&gone));
        assert!(!registry.all_connections().contains(&gone));
    }

    #[test]
    fn stats_snapshot() {
        let registry = ConnectionRegistry::default();
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        let c = ConnectionId::new();
        assert!(registry.add_connection(a, "x"));
        assert!(registry.add_connection(b, "x"));
        assert!(registry.add_connection(c, "y"));

        registry.set_symbol_subscription(a, &sym("AAPL"), true);
        registry.set_symbol_subscription(b, &sym("AAPL"), true);
        registry.set_symbol_subscription(c, &sym("TSLA"), true);
        registry.set_portfolio_subscription(a, true);
        registry.set_notification_subscription(c, true);

        let stats = registry.stats();
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.unique_origins, 2);
        assert_eq!(stats.per_origin_counts["x"], 2);
        assert_eq!(stats.per_symbol_subscriber_counts["AAPL"], 2);
        assert_eq!(stats.per_symbol_subscriber_counts["TSLA"], 1);
        assert_eq!(stats.portfolio_count, 1);
        assert_eq!(stats.notification_count, 1);
    }

    #[test]
    fn thread_safety_concurrent_subscriptions() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(ConnectionRegistry::new(100));
        let shared = sym("SHARE");
        let mut handles = vec![];
        let firsts = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        for _ in 0..10 {
            let r = Arc::clone(&registry);
            let s = shared.clone();
            let f = Arc::clone(&firsts);
            handles.push(thread::spawn(move || {
                let id = ConnectionId::new();
                assert!(r.add_connection(id, "origin"));
                if r.set_symbol_subscription(id, &s, true).needs_start() {
                    f.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.subscriber_count(&shared), 10);
        assert_eq!(firsts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn thread_safety_concurrent_disconnects() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(ConnectionRegistry::new(100));
        let shared = sym("SHARE");
        let ids: Vec<_> = (0..10).map(|_| ConnectionId::new()).collect();
        for id in &ids {
            assert!(registry.add_connection(*id, "origin"));
            registry.set_symbol_subscription(*id, &shared, true);
        }

        let handles: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let r = Arc::clone(&registry);
                thread::spawn(move || {
                    r.remove_connection(id);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.subscriber_count(&shared), 0);
        assert_eq!(registry.origin_count("origin"), 0);
    }
}
