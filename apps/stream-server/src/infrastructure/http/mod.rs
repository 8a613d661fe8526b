//! HTTP and WebSocket Endpoint
//!
//! Serves the client WebSocket plus operational endpoints on one port.
//!
//! # Endpoints
//!
//! - `GET /ws` - WebSocket upgrade; JSON `{"event", "data"}` frames
//! - `GET /health` - JSON health status with connection count and uptime
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /stats` - Registry, alert and scheduler statistics
//! - `GET /metrics` - Prometheus metrics in text format
//! - `POST /notifications/broadcast` - Market news to notification subscribers

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{ServerStats, StreamingService};
use crate::domain::streaming::ServerEvent;
use crate::infrastructure::metrics::get_metrics_handle;

/// Service name reported by `/health`.
pub const SERVICE_NAME: &str = "stock-stream-server";

// =============================================================================
// Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always "OK" while the process serves requests.
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
    /// Current time.
    pub timestamp: DateTime<Utc>,
    /// Live client connections.
    pub connections: usize,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
}

/// Statistics response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    /// Component statistics.
    #[serde(flatten)]
    pub stats: ServerStats,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
}

/// Body of `POST /notifications/broadcast`.
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastRequest {
    /// Short title.
    pub title: String,
    /// Message body.
    pub message: String,
    /// Optional structured payload.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Result of a broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastResponse {
    /// Subscribers the notification was queued for.
    pub delivered: usize,
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the HTTP server.
#[derive(Debug)]
pub struct HttpState {
    service: Arc<StreamingService>,
    started_at: Instant,
    shutdown: CancellationToken,
}

impl HttpState {
    /// Create server state. `shutdown` also closes open WebSocket sessions.
    #[must_use]
    pub fn new(service: Arc<StreamingService>, shutdown: CancellationToken) -> Self {
        Self {
            service,
            started_at: Instant::now(),
            shutdown,
        }
    }

    fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

/// Build the application router.
pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .route("/notifications/broadcast", post(broadcast_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Server
// =============================================================================

/// HTTP server for the WebSocket and operational endpoints.
pub struct HttpServer {
    port: u16,
    state: Arc<HttpState>,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HttpState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Bind the configured port and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError::ServerFailed` if the server stops with an error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), HttpServerError> {
        let port = listener.local_addr().map_or(self.port, |addr| addr.port());
        tracing::info!(port, "HTTP server listening");

        let app = router(self.state).into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn websocket_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<Arc<HttpState>>,
) -> impl IntoResponse {
    let origin = client_origin(&headers, peer.ip());
    ws.on_upgrade(move |socket| run_session(socket, state, origin))
}

async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "OK",
        service: SERVICE_NAME,
        timestamp: Utc::now(),
        connections: state.service.connection_count(),
        uptime_secs: state.uptime_secs(),
    })
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn stats_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(StatsResponse {
        stats: state.service.stats(),
        uptime_secs: state.uptime_secs(),
    })
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

async fn broadcast_handler(
    State(state): State<Arc<HttpState>>,
    Json(request): Json<BroadcastRequest>,
) -> axum::response::Response {
    if request.title.trim().is_empty() || request.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "message": "title and message are required" })),
        )
            .into_response();
    }

    let delivered = state
        .service
        .broadcast_news(&request.title, &request.message, request.data);
    (StatusCode::ACCEPTED, Json(BroadcastResponse { delivered })).into_response()
}

/// First `X-Forwarded-For` entry, else `X-Real-IP`, else the peer address.
fn client_origin(headers: &HeaderMap, peer: IpAddr) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header("x-real-ip"))
        .map_or_else(|| peer.to_string(), str::to_string)
}

// =============================================================================
// WebSocket Session
// =============================================================================

type Sink = SplitSink<WebSocket, Message>;

async fn send_event(sink: &mut Sink, event: &ServerEvent) -> Result<(), axum::Error> {
    match event.encode() {
        Ok(text) => sink.send(Message::Text(text.into())).await,
        Err(e) => {
            tracing::error!(event = event.name(), error = %e, "Failed to encode event");
            Ok(())
        }
    }
}

async fn run_session(socket: WebSocket, state: Arc<HttpState>, origin: String) {
    let (mut sink, mut stream) = socket.split();
    let service = &state.service;

    let mut client = match service.connect(&origin) {
        Ok(client) => client,
        Err(e) => {
            let _ = send_event(&mut sink, &ServerEvent::error(e)).await;
            let _ = sink.close().await;
            return;
        }
    };
    let id = client.id;

    loop {
        tokio::select! {
            () = state.shutdown.cancelled() => {
                let _ = sink.close().await;
                break;
            }
            frame = stream.next() => {
                let replies = match frame {
                    Some(Ok(Message::Text(text))) => service.handle_text(id, text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => service.handle_text(id, text),
                        Err(_) => vec![ServerEvent::error("Invalid message format")],
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = %id, error = %e, "WebSocket receive failed");
                        break;
                    }
                };

                let mut failed = false;
                for reply in &replies {
                    if send_event(&mut sink, reply).await.is_err() {
                        failed = true;
                        break;
                    }
                }
                if failed {
                    break;
                }
            }
            event = client.events.recv() => {
                let Some(event) = event else { break };
                if send_event(&mut sink, &event).await.is_err() {
                    break;
                }
            }
        }
    }

    service.disconnect(id);
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
