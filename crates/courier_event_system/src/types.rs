//! # Core Type Definitions
//!
//! Fundamental value types shared by the protocol, the processor and the
//! gateway.
//!
//! ## Key Types
//!
//! - [`MessageType`] - Discriminant of the wire envelope
//! - [`ConnectionStatus`] - Lifecycle state of a client connection
//! - [`ClientInfo`] - Snapshot of a client connection's bookkeeping
//! - [`EventRoute`] - Parsed `serviceName:module:eventName` triple

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Envelope discriminant carried in the `type` field of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Request,
    Response,
    Event,
    Error,
}

impl MessageType {
    /// Wire spelling of the discriminant.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Event => "event",
            MessageType::Error => "error",
        }
    }

    /// Parses the wire spelling. Matching is case-sensitive.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "request" => Some(MessageType::Request),
            "response" => Some(MessageType::Response),
            "event" => Some(MessageType::Event),
            "error" => Some(MessageType::Error),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Bookkeeping tracked for every client connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Connection id, also used as the recipient id of broadcasts.
    pub id: String,
    /// Milliseconds since the Unix epoch when the connection was accepted.
    pub connected_at: u64,
    pub status: ConnectionStatus,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl ClientInfo {
    /// Creates a connected client record stamped with the current time.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            connected_at: crate::utils::current_timestamp(),
            status: ConnectionStatus::Connected,
            metadata: HashMap::new(),
        }
    }
}

/// The three segments of a routed event type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRoute {
    pub service_name: String,
    pub module: String,
    pub event_name: String,
}

impl fmt::Display for EventRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.service_name, self.module, self.event_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_uses_lowercase_wire_names() {
        assert_eq!(serde_json::to_value(MessageType::Request).unwrap(), "request");
        assert_eq!(MessageType::parse("event"), Some(MessageType::Event));
        assert_eq!(MessageType::parse("EVENT"), None);
    }

    #[test]
    fn client_info_serializes_camel_case() {
        let info = ClientInfo::new("abc");
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["status"], "connected");
        assert!(json["connectedAt"].is_u64());
    }
}
