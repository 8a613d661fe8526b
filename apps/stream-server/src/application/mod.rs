//! Application Layer - Use cases and port definitions.
//!
//! This layer wires the domain state to the outside world: the quote
//! source port, the per-symbol stream scheduler, the subscription router,
//! the broadcast dispatcher, and the session facade used by transports.

/// Port interfaces for external systems (quote providers).
pub mod ports;

/// Application services for streaming, routing, and fan-out.
pub mod services;
