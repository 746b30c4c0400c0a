//! Utility functions and helper methods for the gateway.
//!
//! This module provides convenient factory functions for creating gateway
//! instances with different configurations.

use crate::{config::GatewayConfig, server::GatewayServer};
use std::sync::Arc;

/// Creates a new gateway with default configuration.
///
/// # Example
///
/// ```rust
/// use courier_gateway::create_gateway;
///
/// let gateway = create_gateway();
/// assert_eq!(gateway.get_connected_clients_count(), 0);
/// ```
pub fn create_gateway() -> Arc<GatewayServer> {
    create_gateway_with_config(GatewayConfig::default())
}

/// Creates a new gateway with custom configuration.
///
/// # Example
///
/// ```rust
/// use courier_gateway::{create_gateway_with_config, GatewayConfig};
///
/// let config = GatewayConfig {
///     bind_address: "0.0.0.0:9000".parse().unwrap(),
///     max_connections: 5000,
///     ..Default::default()
/// };
///
/// let gateway = create_gateway_with_config(config);
/// assert_eq!(gateway.config().max_connections, 5000);
/// ```
pub fn create_gateway_with_config(config: GatewayConfig) -> Arc<GatewayServer> {
    Arc::new(GatewayServer::new(config))
}
