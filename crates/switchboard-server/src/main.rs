//! # Switchboard Server
//!
//! Authenticated WebSocket fan-out messaging server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! ACCESS_SECRET=changeme switchboard
//!
//! # Run with a config file
//! SWITCHBOARD_CONFIG=/path/to/switchboard.toml switchboard
//!
//! # Run with environment variables
//! PORT=8080 SWITCHBOARD_HOST=0.0.0.0 ACCESS_SECRET=changeme switchboard
//! ```

mod auth;
mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchboard=debug,switchboard_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!(
        "Starting Switchboard server on {}:{}",
        config.host,
        config.port
    );

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
