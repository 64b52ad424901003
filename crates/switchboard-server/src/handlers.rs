//! HTTP handlers for the Switchboard server.
//!
//! This module wires the routes, authenticates upgrade requests, and hands
//! each upgraded socket to the core's connection bootstrap.

use crate::auth::{Identity, TokenVerifier};
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use switchboard_core::{ConnectError, Connector, Hub, HubHandle};
use switchboard_transport::WebSocketConnection;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Bootstrap for new connections; holds the hub handle.
    pub connector: Connector,
    /// Bearer token verifier.
    pub verifier: TokenVerifier,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create app state around a running hub.
    #[must_use]
    pub fn new(config: Config, hub: HubHandle) -> Self {
        let connector = Connector::new(hub, Arc::new(config.transform()))
            .with_config(config.session_config());

        Self {
            connector,
            verifier: TokenVerifier::new(config.auth.secret.as_bytes()),
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let (hub, _hub_task) = Hub::spawn(config.hub_config());
    let state = Arc::new(AppState::new(config.clone(), hub));
    let app = router(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Switchboard listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Build the application routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/ping", get(ping_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Liveness check.
async fn ping_handler() -> &'static str {
    "pong"
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.connector.hub().stats().await {
        Ok(stats) => {
            metrics::record_hub_stats(&stats);
            (
                StatusCode::OK,
                axum::Json(serde_json::json!({
                    "status": "ok",
                    "version": env!("CARGO_PKG_VERSION"),
                    "clients": stats.clients,
                    "delivered": stats.delivered,
                    "evicted": stats.evicted,
                    "dropped": stats.dropped,
                })),
            )
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(serde_json::json!({
                "status": "unavailable",
                "error": e.to_string(),
            })),
        ),
    }
}

/// WebSocket upgrade handler. The token is checked before the upgrade.
async fn ws_handler(
    Identity(owner): Identity,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    info!(owner = %owner, remote = %addr, "Upgrading connection");

    ws.max_message_size(state.config.transport.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, owner, addr, state))
}

/// Register an upgraded socket with the hub and wait for the session to end.
async fn handle_websocket(socket: WebSocket, owner: String, addr: SocketAddr, state: Arc<AppState>) {
    let connection =
        WebSocketConnection::new(socket, &state.config.websocket_config()).with_remote_addr(addr);

    let session = match state.connector.attach(&owner, connection).await {
        Ok(session) => session,
        Err(e) => {
            warn!(owner = %owner, remote = %addr, error = %e, "Connection bootstrap failed");
            metrics::record_bootstrap_failure(match e {
                ConnectError::Id(_) => "id",
                ConnectError::Hub(_) => "hub",
                ConnectError::IdsExhausted(_) => "collision",
            });
            return;
        }
    };

    let _metrics_guard = ConnectionMetricsGuard::new();
    let client = session.id().clone();
    info!(client = %client, owner = %owner, "Session started");

    session.finished().await;

    info!(client = %client, owner = %owner, "Session ended");
}
