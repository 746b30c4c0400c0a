//! Gateway configuration types and defaults.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};

/// Configuration structure for the connection gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// The socket address to bind the WebSocket listener to
    pub bind_address: SocketAddr,

    /// Maximum number of concurrent connections allowed; excess connections
    /// are refused before the handshake
    pub max_connections: usize,

    /// Maximum accepted text frame size in bytes
    pub max_message_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            max_connections: 1000,
            max_message_size: 64 * 1024, // 64KB
        }
    }
}
