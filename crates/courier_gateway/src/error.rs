//! Error types and handling for the gateway.
//!
//! This module defines the error types that can occur during gateway
//! operations, providing clear categorization of different failure modes.

/// Enumeration of possible gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Network-related errors such as binding failures, handshake failures or
    /// writes to a closed connection
    #[error("Network error: {0}")]
    Network(String),

    /// Internal errors such as transport failures while forwarding events
    #[error("Internal error: {0}")]
    Internal(String),

    /// A request handler is already registered for this action
    #[error("Handler already registered for action: {0}")]
    DuplicateHandler(String),
}
