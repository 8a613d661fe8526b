//! Configuration Module
//!
//! Environment-driven configuration for the stream server.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_YAHOO_BASE_URL, QuoteSourceKind, QuoteSourceSettings, ServerConfig,
    ServerSettings, StreamSettings,
};
