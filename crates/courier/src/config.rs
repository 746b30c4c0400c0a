//! Configuration management for the Courier server.
//!
//! This module handles loading, validation, and conversion of server configuration
//! from TOML files and command-line arguments.

use courier_event_system::providers::session_cache::DEFAULT_KEY_PREFIX;
use courier_event_system::{ProcessorConfig, RetryPolicy};
use courier_gateway::GatewayConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Application configuration loaded from TOML file.
///
/// Every section is optional in the file; missing sections and keys take
/// their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// WebSocket gateway settings
    pub gateway: GatewaySettings,
    /// Pub/sub transport settings
    pub transport: TransportSettings,
    /// Channel names shared by the gateway and the processor
    pub channels: ChannelSettings,
    /// Session cache settings
    pub session: SessionSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

/// Gateway network settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Network address to bind the gateway to (e.g., "127.0.0.1:8080")
    pub bind_address: String,
    /// Maximum number of concurrent client connections
    pub max_connections: usize,
    /// Maximum accepted text frame size in bytes
    pub max_message_size: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        let defaults = GatewayConfig::default();
        Self {
            bind_address: defaults.bind_address.to_string(),
            max_connections: defaults.max_connections,
            max_message_size: defaults.max_message_size,
        }
    }
}

/// Which pub/sub backend carries inbound events and broadcasts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportBackend {
    Redis,
    /// In-process broker; gateway and processor must share the process.
    #[default]
    Memory,
}

impl FromStr for TransportBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("Unknown transport backend: {other}")),
        }
    }
}

impl fmt::Display for TransportBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Redis => "redis",
            Self::Memory => "memory",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub backend: TransportBackend,
    /// Redis connection URL, used by the transport and the session cache
    pub url: String,
    /// Reconnect backoff step in milliseconds
    pub retry_step_ms: u64,
    /// Reconnect backoff cap in milliseconds
    pub retry_max_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            backend: TransportBackend::default(),
            url: "redis://127.0.0.1:6379/".to_string(),
            retry_step_ms: policy.step.as_millis() as u64,
            retry_max_ms: policy.max.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Channel the gateway publishes client events on
    pub incoming: String,
    /// Channel the processor publishes broadcasts on
    pub outgoing: String,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        let defaults = ProcessorConfig::default();
        Self {
            incoming: defaults.incoming_channel,
            outgoing: defaults.outgoing_channel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Key prefix for Redis session mappings
    pub key_prefix: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

/// Logging configuration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the specified path
    /// and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The loaded or default configuration, or an error if loading/creation failed.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Create default config file
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the gateway section into the gateway's own configuration.
    pub fn to_gateway_config(&self) -> Result<GatewayConfig, Box<dyn std::error::Error>> {
        Ok(GatewayConfig {
            bind_address: self.gateway.bind_address.parse()?,
            max_connections: self.gateway.max_connections,
            max_message_size: self.gateway.max_message_size,
        })
    }

    pub fn to_processor_config(&self) -> ProcessorConfig {
        ProcessorConfig::new(&self.channels.incoming, &self.channels.outgoing)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            step: Duration::from_millis(self.transport.retry_step_ms),
            max: Duration::from_millis(self.transport.retry_max_ms),
        }
    }

    /// Validates the configuration settings.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        // Validate bind address
        if self.gateway.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "Invalid bind address: {}",
                &self.gateway.bind_address
            ));
        }

        if self.gateway.max_connections == 0 {
            return Err("gateway.max_connections must be greater than 0".to_string());
        }

        // Validate channels
        if self.channels.incoming.is_empty() || self.channels.outgoing.is_empty() {
            return Err("Channel names cannot be empty".to_string());
        }
        if self.channels.incoming == self.channels.outgoing {
            return Err(format!(
                "Incoming and outgoing channels must differ (both are {})",
                &self.channels.incoming
            ));
        }

        if self.transport.retry_max_ms < self.transport.retry_step_ms {
            return Err("transport.retry_max_ms must be at least transport.retry_step_ms".to_string());
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
