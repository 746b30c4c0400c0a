//! Message handling and routing for client-gateway communication.
//!
//! This module provides the infrastructure for parsing, routing, and handling
//! frames sent by clients: request handlers, local event listeners and the
//! router that selects between them.

pub mod listeners;
pub mod requests;
pub mod router;

pub use listeners::{EventListener, EventListenerRegistry};
pub use requests::{RequestHandler, RequestRegistry};
pub use router::MessageRouter;

use std::any::Any;

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "Handler panicked".to_string()
    }
}
