//! # Error Types
//!
//! Error enums for each layer of the event system, plus the [`ErrorCode`]
//! vocabulary that travels inside error envelopes on the wire.

use crate::protocol::ErrorMessage;
use std::fmt;
use tracing::error;

/// Machine-readable error codes placed in the `code` field of error
/// envelopes and error broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Malformed envelope.
    ValidationError,
    /// Event type does not follow `serviceName:module:eventName`.
    InvalidEventFormat,
    /// No event handler registered for the literal event type.
    NoHandler,
    /// No request handler registered for the action.
    UnknownAction,
    /// A request handler failed.
    HandlerError,
    /// An event handler failed.
    EventProcessingError,
    Unauthorized,
    NotFound,
    Timeout,
    /// Generic conversion performed by [`handle_error`].
    Error,
    /// Default code of [`ErrorMessage::from_error`].
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::InvalidEventFormat => "INVALID_EVENT_FORMAT",
            ErrorCode::NoHandler => "NO_HANDLER",
            ErrorCode::UnknownAction => "UNKNOWN_ACTION",
            ErrorCode::HandlerError => "HANDLER_ERROR",
            ErrorCode::EventProcessingError => "EVENT_PROCESSING_ERROR",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Error => "ERROR",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        code.as_str().to_string()
    }
}

/// Failure to decode a wire envelope into a typed message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid message format")]
    InvalidFormat,
    #[error("Expected a {expected} message, got {actual}")]
    UnexpectedType { expected: &'static str, actual: String },
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Errors raised by a pub/sub transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Transport has been disconnected")]
    Closed,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by session-cache and auth backends.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Provider error: {0}")]
    Other(String),
}

/// Errors raised by the event processor.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Auth provider must be set before starting Event Processor")]
    AuthProviderNotConfigured,
    #[error("Session cache must be set before resolving connections")]
    SessionCacheNotConfigured,
    #[error("Handler already registered for event type: {0}")]
    DuplicateHandler(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Logs `err` with its context and converts it into a generic error envelope.
pub fn handle_error(err: &(dyn std::error::Error + 'static), context: &str) -> ErrorMessage {
    error!("❌ Error in {}: {}", context, err);
    ErrorMessage::from_error(err, Some(ErrorCode::Error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_use_screaming_snake_case() {
        assert_eq!(ErrorCode::EventProcessingError.as_str(), "EVENT_PROCESSING_ERROR");
        assert_eq!(ErrorCode::NoHandler.to_string(), "NO_HANDLER");
    }

    #[test]
    fn handle_error_produces_generic_code() {
        let err = ProviderError::Other("backend down".into());
        let message = handle_error(&err, "session lookup");
        assert_eq!(message.code, "ERROR");
        assert_eq!(message.message, "Provider error: backend down");
    }
}
