//! Metrics collection and export for Switchboard.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use switchboard_core::HubStats;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "switchboard_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "switchboard_connections_active";
    pub const AUTH_FAILURES_TOTAL: &str = "switchboard_auth_failures_total";
    pub const BOOTSTRAP_FAILURES_TOTAL: &str = "switchboard_bootstrap_failures_total";
    pub const CLIENTS_REGISTERED: &str = "switchboard_clients_registered";
    pub const CLIENTS_EVICTED: &str = "switchboard_clients_evicted";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Upgrade requests rejected for a missing or invalid token"
    );
    metrics::describe_counter!(
        names::BOOTSTRAP_FAILURES_TOTAL,
        "Authenticated connections that could not be registered"
    );
    metrics::describe_gauge!(
        names::CLIENTS_REGISTERED,
        "Clients in the hub registry at the last health check"
    );
    metrics::describe_gauge!(
        names::CLIENTS_EVICTED,
        "Clients disconnected for a full outbound queue, as of the last health check"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a rejected token.
pub fn record_auth_failure() {
    counter!(names::AUTH_FAILURES_TOTAL).increment(1);
}

/// Record a failed bootstrap.
pub fn record_bootstrap_failure(reason: &str) {
    counter!(names::BOOTSTRAP_FAILURES_TOTAL, "reason" => reason.to_string()).increment(1);
}

/// Publish a hub snapshot.
pub fn record_hub_stats(stats: &HubStats) {
    gauge!(names::CLIENTS_REGISTERED).set(stats.clients as f64);
    gauge!(names::CLIENTS_EVICTED).set(stats.evicted as f64);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
