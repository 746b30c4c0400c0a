//! # Message Protocol
//!
//! Wire envelopes, their structural validators, and the event-type grammar.

pub mod event_parser;
pub mod message;
pub mod validator;

pub use event_parser::{format_event_type, get_service_name, is_valid_event_format, parse_event_type};
pub use message::{ErrorMessage, EventMessage, Message, Request, Response};
pub use validator::{
    is_valid_message, validate, validate_error, validate_event, validate_request, validate_response,
};
