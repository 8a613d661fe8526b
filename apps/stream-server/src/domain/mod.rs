//! Domain Layer - Core streaming state and value types.
//!
//! This layer holds the connection registry, the alert book, and the
//! market value types that flow through the fan-out pipeline. Nothing
//! here performs I/O; concurrency is limited to lock-guarded state.

/// Market value types (symbols, quotes, indices, portfolio snapshots).
pub mod market;

/// Live client connections and their subscription state.
pub mod connection;

/// Client-created one-shot price alerts.
pub mod alert;

/// Transient notifications delivered to clients.
pub mod notification;

/// Internal stream events and the client/server wire protocol.
pub mod streaming;
