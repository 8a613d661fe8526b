//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the transport and ambient stack.

/// Configuration loaded from the environment.
pub mod config;

/// WebSocket endpoint and operational HTTP routes.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Quote source adapters (Yahoo Finance, simulated).
pub mod quote_source;

/// OpenTelemetry tracing integration.
pub mod telemetry;
