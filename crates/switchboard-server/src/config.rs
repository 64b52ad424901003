//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (SWITCHBOARD_*, PORT, ACCESS_SECRET)
//! - TOML configuration file

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use switchboard_core::{HubConfig, PrefixTransform, SessionConfig};
use switchboard_transport::WebSocketConfig;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Hub sizing.
    #[serde(default)]
    pub hub: HubSettings,

    /// Per-connection settings.
    #[serde(default)]
    pub session: SessionSettings,

    /// Content transform for the `_special` message kinds.
    #[serde(default)]
    pub transform: TransformConfig,

    /// Token verification.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Hub sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Outbound queue capacity per client. A client whose queue fills is
    /// disconnected.
    #[serde(default = "default_client_queue_capacity")]
    pub client_queue_capacity: usize,

    /// Capacity of each hub input channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Per-connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Write deadline in milliseconds; 0 disables it.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// Client ID attempts before a connection is refused.
    #[serde(default = "default_register_attempts")]
    pub register_attempts: usize,
}

/// Content transform configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Prefix applied to `broadcast_special` content.
    #[serde(default = "default_broadcast_prefix")]
    pub broadcast_prefix: String,

    /// Prefix applied to `private_special` content.
    #[serde(default = "default_direct_prefix")]
    pub direct_prefix: String,
}

/// Token verification configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for bearer tokens.
    #[serde(default = "default_secret", skip_serializing)]
    pub secret: String,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("SWITCHBOARD_HOST").unwrap_or_else(|_| "0.0.0.0".to_string())
}

fn default_port() -> u16 {
    std::env::var("SWITCHBOARD_PORT")
        .or_else(|_| std::env::var("PORT"))
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_secret() -> String {
    std::env::var("ACCESS_SECRET").unwrap_or_default()
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_client_queue_capacity() -> usize {
    256
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_write_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_register_attempts() -> usize {
    3
}

fn default_broadcast_prefix() -> String {
    "ALARM: ".to_string()
}

fn default_direct_prefix() -> String {
    "SECURE MSG: ".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            hub: HubSettings::default(),
            session: SessionSettings::default(),
            transform: TransformConfig::default(),
            auth: AuthConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            client_queue_capacity: default_client_queue_capacity(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            write_timeout_ms: default_write_timeout(),
            register_attempts: default_register_attempts(),
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            broadcast_prefix: default_broadcast_prefix(),
            direct_prefix: default_direct_prefix(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: default_secret(),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// `SWITCHBOARD_CONFIG` names an explicit file; otherwise the usual
    /// locations are searched.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or the
    /// result is invalid.
    pub fn load() -> Result<Self> {
        let config = match Self::find_file() {
            Some(path) => Self::from_file(path)?,
            // Fall back to defaults with environment overrides
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    fn find_file() -> Option<String> {
        if let Ok(path) = std::env::var("SWITCHBOARD_CONFIG") {
            return Some(path);
        }

        let config_paths = [
            "switchboard.toml",
            "/etc/switchboard/switchboard.toml",
            "~/.config/switchboard/switchboard.toml",
        ];

        config_paths
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Check settings that have no usable default.
    ///
    /// # Errors
    ///
    /// Returns an error if the auth secret is empty or a capacity is zero.
    pub fn validate(&self) -> Result<()> {
        if self.auth.secret.is_empty() {
            bail!("auth.secret is empty; set it in the config file or ACCESS_SECRET");
        }
        if self.hub.client_queue_capacity == 0 || self.hub.channel_capacity == 0 {
            bail!("hub capacities must be greater than zero");
        }
        if !self.transport.websocket_path.starts_with('/') {
            bail!(
                "transport.websocket_path must start with '/': {}",
                self.transport.websocket_path
            );
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Hub settings for the core.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            client_queue_capacity: self.hub.client_queue_capacity,
            channel_capacity: self.hub.channel_capacity,
        }
    }

    /// Session settings for the core.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            write_timeout: (self.session.write_timeout_ms > 0)
                .then(|| Duration::from_millis(self.session.write_timeout_ms)),
            register_attempts: self.session.register_attempts,
        }
    }

    /// WebSocket adapter settings.
    #[must_use]
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_message_size: self.transport.max_message_size,
        }
    }

    /// The configured content transform.
    #[must_use]
    pub fn transform(&self) -> PrefixTransform {
        PrefixTransform::new(
            self.transform.broadcast_prefix.clone(),
            self.transform.direct_prefix.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.hub.client_queue_capacity, 256);
        assert_eq!(config.transform.broadcast_prefix, "ALARM: ");
        assert_eq!(config.transform.direct_prefix, "SECURE MSG: ");
    }

    #[test]
    fn test_config_bind_addr() {
        let mut config = Config::default();
        config.host = "127.0.0.1".to_string();
        config.port = 9000;
        assert_eq!(config.bind_addr().unwrap().port(), 9000);

        config.host = "not a host".to_string();
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "127.0.0.1"
            port = 9000

            [hub]
            client_queue_capacity = 32

            [session]
            write_timeout_ms = 0

            [transform]
            broadcast_prefix = "NOTICE: "

            [auth]
            secret = "s3cret"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9000);
        assert_eq!(config.hub_config().client_queue_capacity, 32);
        assert_eq!(config.hub_config().channel_capacity, 1024);
        assert!(config.session_config().write_timeout.is_none());
        assert_eq!(config.transform().broadcast_prefix, "NOTICE: ");
        assert_eq!(config.transform().direct_prefix, "SECURE MSG: ");
        assert_eq!(config.auth.secret, "s3cret");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_secret() {
        let mut config = Config::default();
        config.auth.secret = String::new();
        assert!(config.validate().is_err());

        config.auth.secret = "s3cret".to_string();
        config.hub.client_queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secret_not_in_debug_output() {
        let mut config = Config::default();
        config.auth.secret = "hunter2".to_string();
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
