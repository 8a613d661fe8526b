//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Connections**: Live client connections and cap rejections
//! - **Streams**: Active per-symbol poll tasks
//! - **Upstream**: Poll outcomes and latency against the quote source
//! - **Delivery**: Events delivered and dropped per event type
//! - **Alerts**: Price alerts fired
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP port. Recording before
//! `init_metrics` is a no-op, which keeps unit tests free of a recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_gauge!(
        "stock_stream_connections",
        "Number of live client connections"
    );
    describe_counter!(
        "stock_stream_connections_rejected_total",
        "Connections refused by the per-origin cap"
    );

    describe_gauge!(
        "stock_stream_active_streams",
        "Number of running per-symbol poll tasks"
    );

    describe_counter!(
        "stock_stream_upstream_polls_total",
        "Upstream quote source polls by kind and outcome"
    );
    describe_histogram!(
        "stock_stream_upstream_poll_seconds",
        "Upstream quote source poll latency"
    );

    describe_counter!(
        "stock_stream_events_delivered_total",
        "Events queued to client connections"
    );
    describe_counter!(
        "stock_stream_events_dropped_total",
        "Events dropped because a client queue was full or closed"
    );

    describe_counter!(
        "stock_stream_alerts_triggered_total",
        "Price alerts fired"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// What an upstream poll was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollKind {
    /// Per-symbol quote.
    Symbol,
    /// Market overview indices.
    Market,
}

impl PollKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Symbol => "symbol",
            Self::Market => "market",
        }
    }
}

/// How an upstream poll ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Data received and emitted.
    Success,
    /// Provider had no data.
    Empty,
    /// Provider returned an error.
    Failed,
    /// Poll exceeded the upstream timeout.
    TimedOut,
}

impl PollOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Empty => "empty",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Update the live connection count.
#[allow(clippy::cast_precision_loss)]
pub fn set_connections(count: usize) {
    gauge!("stock_stream_connections").set(count as f64);
}

/// Record a connection refused by the per-origin cap.
pub fn record_connection_rejected() {
    counter!("stock_stream_connections_rejected_total").increment(1);
}

/// Update the running stream task count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_streams(count: usize) {
    gauge!("stock_stream_active_streams").set(count as f64);
}

/// Record an upstream poll and its latency.
pub fn record_poll(kind: PollKind, outcome: PollOutcome, duration: Duration) {
    counter!(
        "stock_stream_upstream_polls_total",
        "kind" => kind.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!(
        "stock_stream_upstream_poll_seconds",
        "kind" => kind.as_str()
    )
    .record(duration.as_secs_f64());
}

/// Record events queued to clients.
pub fn record_events_delivered(event: &'static str, count: u64) {
    counter!(
        "stock_stream_events_delivered_total",
        "event" => event
    )
    .increment(count);
}

/// Record events dropped for slow or closed clients.
pub fn record_events_dropped(event: &'static str, count: u64) {
    counter!(
        "stock_stream_events_dropped_total",
        "event" => event
    )
    .increment(count);
}

/// Record fired price alerts.
pub fn record_alerts_triggered(count: u64) {
    counter!("stock_stream_alerts_triggered_total").increment(count);
}

// =============================================================================
// Tests
// =============================================================================
