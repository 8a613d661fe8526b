//! Server Configuration Settings
//!
//! Configuration types for the stream server, loaded from environment variables.
//! Unparseable values fall back to defaults; values that would make the
//! server unusable (zero intervals, zero caps) are rejected.

use std::time::Duration;

use crate::application::services::SchedulerConfig;

/// Default Yahoo Finance chart endpoint.
pub const DEFAULT_YAHOO_BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

/// Which quote source adapter to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuoteSourceKind {
    /// Yahoo Finance chart API.
    #[default]
    Yahoo,
    /// Offline random walk.
    Simulated,
}

impl QuoteSourceKind {
    /// Parse the adapter name.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "yahoo" => Some(Self::Yahoo),
            "simulated" | "sim" => Some(Self::Simulated),
            _ => None,
        }
    }

    /// Adapter name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Yahoo => "yahoo",
            Self::Simulated => "simulated",
        }
    }
}

/// HTTP server and connection settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Port serving `/ws`, `/health`, `/stats` and `/metrics`.
    pub port: u16,
    /// Per-origin connection cap.
    pub max_connections_per_origin: usize,
    /// Per-client outbound queue capacity.
    pub client_buffer_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 3002,
            max_connections_per_origin: 50,
            client_buffer_capacity: 256,
        }
    }
}

/// Poll intervals.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Per-symbol quote poll period.
    pub stock_interval: Duration,
    /// Market overview poll period.
    pub market_interval: Duration,
    /// Portfolio tick period.
    pub portfolio_interval: Duration,
    /// Bound on each upstream call.
    pub upstream_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            stock_interval: Duration::from_millis(2000),
            market_interval: Duration::from_millis(5000),
            portfolio_interval: Duration::from_millis(10_000),
            upstream_timeout: Duration::from_millis(10_000),
        }
    }
}

impl From<&StreamSettings> for SchedulerConfig {
    fn from(settings: &StreamSettings) -> Self {
        Self {
            stock_interval: settings.stock_interval,
            market_interval: settings.market_interval,
            portfolio_interval: settings.portfolio_interval,
            upstream_timeout: settings.upstream_timeout,
        }
    }
}

/// Quote source adapter settings.
#[derive(Debug, Clone)]
pub struct QuoteSourceSettings {
    /// Adapter to run.
    pub kind: QuoteSourceKind,
    /// Yahoo chart endpoint.
    pub yahoo_base_url: String,
    /// How long a fetched quote is served from cache.
    pub cache_ttl: Duration,
    /// Minimum spacing between outbound requests.
    pub min_request_interval: Duration,
}

impl Default for QuoteSourceSettings {
    fn default() -> Self {
        Self {
            kind: QuoteSourceKind::default(),
            yahoo_base_url: DEFAULT_YAHOO_BASE_URL.to_string(),
            cache_ttl: Duration::from_secs(60),
            min_request_interval: Duration::from_millis(250),
        }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// HTTP server and connection settings.
    pub server: ServerSettings,
    /// Poll intervals.
    pub streams: StreamSettings,
    /// Quote source adapter settings.
    pub quote_source: QuoteSourceSettings,
}

impl ServerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is present but unusable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let server_defaults = ServerSettings::default();
        let stream_defaults = StreamSettings::default();
        let source_defaults = QuoteSourceSettings::default();

        let server = ServerSettings {
            port: env.parse("WEBSOCKET_PORT", server_defaults.port),
            max_connections_per_origin: env.non_zero(
                "MAX_CONNECTIONS_PER_IP",
                server_defaults.max_connections_per_origin,
            )?,
            client_buffer_capacity: env.non_zero(
                "CLIENT_BUFFER_CAPACITY",
                server_defaults.client_buffer_capacity,
            )?,
        };

        let streams = StreamSettings {
            stock_interval: env.millis("STOCK_QUOTES_INTERVAL", stream_defaults.stock_interval)?,
            market_interval: env.millis("MARKET_DATA_INTERVAL", stream_defaults.market_interval)?,
            portfolio_interval: env.millis(
                "PORTFOLIO_UPDATE_INTERVAL",
                stream_defaults.portfolio_interval,
            )?,
            upstream_timeout: env.millis("UPSTREAM_TIMEOUT_MS", stream_defaults.upstream_timeout)?,
        };

        let kind = match env.get("QUOTE_SOURCE") {
            Some(value) => QuoteSourceKind::from_str_case_insensitive(&value).ok_or_else(|| {
                ConfigError::InvalidValue {
                    key: "QUOTE_SOURCE".to_string(),
                    value,
                }
            })?,
            None => source_defaults.kind,
        };

        let quote_source = QuoteSourceSettings {
            kind,
            yahoo_base_url: env
                .get("YAHOO_BASE_URL")
                .map_or(source_defaults.yahoo_base_url, |url| {
                    url.trim_end_matches('/').to_string()
                }),
            cache_ttl: Duration::from_secs(
                env.parse("QUOTE_CACHE_TTL_SECS", source_defaults.cache_ttl.as_secs()),
            ),
            min_request_interval: env.millis_or_zero(
                "QUOTE_MIN_REQUEST_INTERVAL_MS",
                source_defaults.min_request_interval,
            ),
        };

        Ok(Self {
            server,
            streams,
            quote_source,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Value must be greater than zero.
    #[error("environment variable {0} must be greater than zero")]
    ZeroValue(String),
    /// Value is not one of the accepted options.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn non_zero(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        match self.parse(key, default) {
            0 => Err(ConfigError::ZeroValue(key.to_string())),
            n => Ok(n),
        }
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.millis_or_zero(key, default) {
            Duration::ZERO => Err(ConfigError::ZeroValue(key.to_string())),
            duration => Ok(duration),
        }
    }

    fn millis_or_zero(&self, key: &str, default: Duration) -> Duration {
        let default = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(self.parse(key, default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config(&[]).unwrap();

        assert_eq!(config.server.port, 3002);
        assert_eq!(config.server.max_connections_per_origin, 50);
        assert_eq!(config.server.client_buffer_capacity, 256);
        assert_eq!(config.streams.stock_interval, Duration::from_millis(2000));
        assert_eq!(config.streams.market_interval, Duration::from_millis(5000));
        assert_eq!(config.streams.portfolio_interval, Duration::from_millis(10_000));
        assert_eq!(config.streams.upstream_timeout, Duration::from_millis(10_000));
        assert_eq!(config.quote_source.kind, QuoteSourceKind::Yahoo);
        assert_eq!(config.quote_source.yahoo_base_url, DEFAULT_YAHOO_BASE_URL);
        assert_eq!(config.quote_source.cache_ttl, Duration::from_secs(60));
        assert_eq!(
            config.quote_source.min_request_interval,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn overrides_are_applied() {
        let config = config(&[
            ("WEBSOCKET_PORT", "4000"),
            ("MAX_CONNECTIONS_PER_IP", "5"),
            ("STOCK_QUOTES_INTERVAL", "500"),
            ("MARKET_DATA_INTERVAL", "1000"),
            ("PORTFOLIO_UPDATE_INTERVAL", "3000"),
            ("QUOTE_SOURCE", "Simulated"),
            ("YAHOO_BASE_URL", "http://localhost:9000/chart/"),
        ])
        .unwrap();

        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.max_connections_per_origin, 5);
        assert_eq!(config.streams.stock_interval, Duration::from_millis(500));
        assert_eq!(config.streams.market_interval, Duration::from_millis(1000));
        assert_eq!(config.streams.portfolio_interval, Duration::from_millis(3000));
        assert_eq!(config.quote_source.kind, QuoteSourceKind::Simulated);
        assert_eq!(config.quote_source.yahoo_base_url, "http://localhost:9000/chart");
    }

    #[test]
    fn garbage_falls_back_to_default() {
        let config = config(&[("WEBSOCKET_PORT", "not-a-port"), ("STOCK_QUOTES_INTERVAL", "fast")])
            .unwrap();

        assert_eq!(config.server.port, 3002);
        assert_eq!(config.streams.stock_interval, Duration::from_millis(2000));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = config(&[("MARKET_DATA_INTERVAL", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroValue(key) if key == "MARKET_DATA_INTERVAL"));
    }

    #[test]
    fn zero_connection_cap_is_rejected() {
        assert!(matches!(
            config(&[("MAX_CONNECTIONS_PER_IP", "0")]),
            Err(ConfigError::ZeroValue(_))
        ));
    }

    #[test]
    fn unknown_quote_source_is_rejected() {
        let err = config(&[("QUOTE_SOURCE", "bloomberg")]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "environment variable QUOTE_SOURCE has invalid value \"bloomberg\""
        );
    }

    #[test]
    fn quote_source_kind_parsing() {
        assert_eq!(
            QuoteSourceKind::from_str_case_insensitive("YAHOO"),
            Some(QuoteSourceKind::Yahoo)
        );
        assert_eq!(
            QuoteSourceKind::from_str_case_insensitive("sim"),
            Some(QuoteSourceKind::Simulated)
        );
        assert_eq!(QuoteSourceKind::from_str_case_insensitive("x"), None);
        assert_eq!(QuoteSourceKind::Simulated.as_str(), "simulated");
    }

    #[test]
    fn scheduler_config_from_stream_settings() {
        let settings = StreamSettings::default();
        let scheduler = SchedulerConfig::from(&settings);
        assert_eq!(scheduler.stock_interval, settings.stock_interval);
        assert_eq!(scheduler.upstream_timeout, settings.upstream_timeout);
    }
}
