//! Per-message pipeline for inbound events.
//!
//! raw JSON → [`GatewayEvent`] → route parse → handler lookup → handler →
//! broadcasts. Every failure after the event is decoded becomes an error
//! broadcast addressed to the originating socket.

use super::core::EventProcessor;
use crate::error::{ErrorCode, EventError};
use crate::events::{BroadcastEvent, EventContext, EventHandler, GatewayEvent};
use crate::protocol::parse_event_type;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "Handler panicked".to_string()
    }
}

impl EventProcessor {
    /// Entry point for raw messages from the inbound channel.
    ///
    /// Undecodable messages are dropped: without a `socketId` there is nobody
    /// to address an error to.
    pub(crate) async fn process_message(&self, raw: &str) {
        let event: GatewayEvent = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!("⚠️ Dropping undecodable inbound event: {}", e);
                return;
            }
        };

        if let Err(e) = self.process_event(event).await {
            error!("❌ Failed to publish result of inbound event: {}", e);
        }
    }

    /// Routes one event to its handler and publishes the outcome.
    ///
    /// Only a failure to publish an error broadcast is returned; handler
    /// failures are reported to the origin.
    pub async fn process_event(&self, mut event: GatewayEvent) -> Result<(), EventError> {
        let Some(route) = parse_event_type(&event.event_type) else {
            warn!("⚠️ Invalid event type '{}' from socket {}", event.event_type, event.socket_id);
            let message = format!(
                "Invalid event format: {}. Expected format: serviceName:module:name",
                event.event_type
            );
            let reply = BroadcastEvent::error(&event.socket_id, ErrorCode::InvalidEventFormat, message)
                .with_payload_field("eventType", event.event_type.clone());
            return self.broadcast(reply).await;
        };
        event.annotate(route);

        // Clone out of the map so no shard guard is held across the handler.
        let handler = self.handlers.get(&event.event_type).map(|entry| Arc::clone(entry.value()));
        let Some(handler) = handler else {
            warn!("⚠️ No handler for '{}' from socket {}", event.event_type, event.socket_id);
            let message = format!("No handler registered for event type: {}", event.event_type);
            let reply = BroadcastEvent::error(&event.socket_id, ErrorCode::NoHandler, message)
                .with_payload_field("eventType", event.event_type.clone());
            return self.broadcast(reply).await;
        };

        let event_type = event.event_type.clone();
        let socket_id = event.socket_id.clone();
        debug!("📨 Dispatching '{}' from socket {}", event_type, socket_id);

        let outcome = AssertUnwindSafe(self.run_handler(handler, EventContext::from(event)))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic_message(panic.as_ref()),
        };

        error!("❌ Handler for '{}' failed: {}", event_type, failure);
        let reply = BroadcastEvent::error(&socket_id, ErrorCode::EventProcessingError, failure);
        self.broadcast(reply).await
    }

    /// Invokes the handler and publishes its output in order.
    async fn run_handler(&self, handler: Arc<dyn EventHandler>, ctx: EventContext) -> anyhow::Result<()> {
        let output = handler.handle(ctx).await?;
        for broadcast in output.into_vec() {
            self.broadcast(broadcast).await?;
        }
        Ok(())
    }
}
