//! Structural validation of raw envelopes.
//!
//! These checks run at every ingress boundary before any typed
//! reconstruction; data that fails them never becomes a DTO.

use crate::types::MessageType;
use serde_json::Value;

/// True iff `data` is an object with a string `id`, a known `type`, a numeric
/// `timestamp` and a `payload` key (whose value may be null).
pub fn is_valid_message(data: &Value) -> bool {
    let Some(obj) = data.as_object() else {
        return false;
    };

    obj.get("id").is_some_and(Value::is_string)
        && obj
            .get("type")
            .and_then(Value::as_str)
            .and_then(MessageType::parse)
            .is_some()
        && obj.get("timestamp").is_some_and(Value::is_number)
        && obj.contains_key("payload")
}

fn has_type(data: &Value, expected: MessageType) -> bool {
    data.get("type").and_then(Value::as_str) == Some(expected.as_str())
}

fn has_string(data: &Value, key: &str) -> bool {
    data.get(key).is_some_and(Value::is_string)
}

pub fn validate_request(data: &Value) -> bool {
    is_valid_message(data) && has_type(data, MessageType::Request) && has_string(data, "action")
}

pub fn validate_response(data: &Value) -> bool {
    is_valid_message(data)
        && has_type(data, MessageType::Response)
        && has_string(data, "requestId")
        && data.get("success").is_some_and(Value::is_boolean)
}

pub fn validate_event(data: &Value) -> bool {
    is_valid_message(data) && has_type(data, MessageType::Event) && has_string(data, "eventName")
}

pub fn validate_error(data: &Value) -> bool {
    is_valid_message(data)
        && has_type(data, MessageType::Error)
        && has_string(data, "code")
        && has_string(data, "message")
}

/// Runs the variant validator selected by the `type` discriminant.
pub fn validate(data: &Value) -> bool {
    match data
        .get("type")
        .and_then(Value::as_str)
        .and_then(MessageType::parse)
    {
        Some(MessageType::Request) => validate_request(data),
        Some(MessageType::Response) => validate_response(data),
        Some(MessageType::Event) => validate_event(data),
        Some(MessageType::Error) => validate_error(data),
        None => false,
    }
}
