//! Wire envelopes exchanged between clients, gateways and processors.
//!
//! Every envelope carries `id`, `type`, `timestamp` and `payload`. The four
//! variants add their own fields and are unified by the [`Message`] tagged
//! union, keyed by the `type` discriminant.

use crate::error::{ErrorCode, ProtocolError};
use crate::types::MessageType;
use crate::utils::{current_timestamp, generate_message_id};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Checks the `type` discriminant of raw data before typed reconstruction.
fn expect_type(value: &Value, expected: MessageType) -> Result<(), ProtocolError> {
    match value.get("type").and_then(Value::as_str) {
        Some(actual) if actual == expected.as_str() => Ok(()),
        Some(actual) => Err(ProtocolError::UnexpectedType {
            expected: expected.as_str(),
            actual: actual.to_string(),
        }),
        None => Err(ProtocolError::InvalidFormat),
    }
}

/// A client asking the gateway to perform `action`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: String,
    pub timestamp: u64,
    #[serde(default)]
    pub payload: Value,
    pub action: String,
}

impl Request {
    pub fn new(action: impl Into<String>, payload: Value) -> Self {
        Self {
            id: generate_message_id(),
            timestamp: current_timestamp(),
            payload,
            action: action.into(),
        }
    }

    /// Replaces the generated id with an explicit one.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "type": MessageType::Request,
            "timestamp": self.timestamp,
            "payload": self.payload,
            "action": self.action,
        })
    }

    pub fn from_json(value: Value) -> Result<Self, ProtocolError> {
        expect_type(&value, MessageType::Request)?;
        Ok(serde_json::from_value(value)?)
    }
}

/// The outcome of a [`Request`], correlated by `request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: String,
    pub timestamp: u64,
    #[serde(default)]
    pub payload: Value,
    pub request_id: String,
    pub success: bool,
}

impl Response {
    pub fn new(request_id: impl Into<String>, success: bool, payload: Value) -> Self {
        Self {
            id: generate_message_id(),
            timestamp: current_timestamp(),
            payload,
            request_id: request_id.into(),
            success,
        }
    }

    /// Successful response carrying `payload`.
    pub fn success(request_id: impl Into<String>, payload: Value) -> Self {
        Self::new(request_id, true, payload)
    }

    /// Failed response whose payload is `{code, message}`.
    pub fn error(
        request_id: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let payload = json!({ "code": code.into(), "message": message.into() });
        Self::new(request_id, false, payload)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "type": MessageType::Response,
            "timestamp": self.timestamp,
            "payload": self.payload,
            "requestId": self.request_id,
            "success": self.success,
        })
    }

    pub fn from_json(value: Value) -> Result<Self, ProtocolError> {
        expect_type(&value, MessageType::Response)?;
        Ok(serde_json::from_value(value)?)
    }
}

/// A named event, sent by clients or pushed to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    pub id: String,
    pub timestamp: u64,
    #[serde(default)]
    pub payload: Value,
    pub event_name: String,
}

impl EventMessage {
    pub fn new(event_name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: generate_message_id(),
            timestamp: current_timestamp(),
            payload,
            event_name: event_name.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "type": MessageType::Event,
            "timestamp": self.timestamp,
            "payload": self.payload,
            "eventName": self.event_name,
        })
    }

    pub fn from_json(value: Value) -> Result<Self, ProtocolError> {
        expect_type(&value, MessageType::Event)?;
        Ok(serde_json::from_value(value)?)
    }
}

/// An error pushed to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    pub id: String,
    pub timestamp: u64,
    #[serde(default)]
    pub payload: Value,
    pub code: String,
    pub message: String,
}

impl ErrorMessage {
    pub fn new(code: impl Into<String>, message: impl Into<String>, payload: Value) -> Self {
        Self {
            id: generate_message_id(),
            timestamp: current_timestamp(),
            payload,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Captures a native error. The payload holds `{"stack": [...]}`, the
    /// error followed by its chain of sources. `code` defaults to
    /// `UNKNOWN_ERROR`.
    pub fn from_error(err: &(dyn std::error::Error + 'static), code: Option<ErrorCode>) -> Self {
        let mut stack = Vec::new();
        let mut current = Some(err);
        while let Some(e) = current {
            stack.push(Value::String(e.to_string()));
            current = e.source();
        }

        Self::new(
            code.unwrap_or(ErrorCode::UnknownError),
            err.to_string(),
            json!({ "stack": stack }),
        )
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message, Value::Null)
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("{} not found", resource), Value::Null)
    }

    /// `UNAUTHORIZED` error; the message defaults to "Unauthorized".
    pub fn unauthorized(message: Option<&str>) -> Self {
        Self::new(
            ErrorCode::Unauthorized,
            message.unwrap_or("Unauthorized"),
            Value::Null,
        )
    }

    pub fn timeout(operation: &str) -> Self {
        Self::new(ErrorCode::Timeout, format!("{} timed out", operation), Value::Null)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "type": MessageType::Error,
            "timestamp": self.timestamp,
            "payload": self.payload,
            "code": self.code,
            "message": self.message,
        })
    }

    pub fn from_json(value: Value) -> Result<Self, ProtocolError> {
        expect_type(&value, MessageType::Error)?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Tagged union over every envelope variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Request(Request),
    Response(Response),
    Event(EventMessage),
    Error(ErrorMessage),
}

impl Message {
    pub fn id(&self) -> &str {
        match self {
            Message::Request(m) => &m.id,
            Message::Response(m) => &m.id,
            Message::Event(m) => &m.id,
            Message::Error(m) => &m.id,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Request(_) => MessageType::Request,
            Message::Response(_) => MessageType::Response,
            Message::Event(_) => MessageType::Event,
            Message::Error(_) => MessageType::Error,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Message::Request(m) => m.to_json(),
            Message::Response(m) => m.to_json(),
            Message::Event(m) => m.to_json(),
            Message::Error(m) => m.to_json(),
        }
    }

    /// Reconstructs whichever variant the `type` discriminant names.
    pub fn from_json(value: Value) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_value(value)?)
    }
}

impl From<Request> for Message {
    fn from(m: Request) -> Self {
        Message::Request(m)
    }
}

impl From<Response> for Message {
    fn from(m: Response) -> Self {
        Message::Response(m)
    }
}

impl From<EventMessage> for Message {
    fn from(m: EventMessage) -> Self {
        Message::Event(m)
    }
}

impl From<ErrorMessage> for Message {
    fn from(m: ErrorMessage) -> Self {
        Message::Error(m)
    }
}
