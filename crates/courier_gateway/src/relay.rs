//! Delivery of processor broadcasts to local connections.
//!
//! Every gateway process subscribes its relay to the outbound channel. A
//! broadcast lists recipient connection ids; the relay writes the frame to
//! those that live in this process and ignores the rest.

use crate::connection::ConnectionManager;
use crate::error::GatewayError;
use courier_event_system::{
    BroadcastEvent, ErrorCode, ErrorMessage, EventMessage, Message, MessageHandler, PubSub,
    SubscriptionId, Value,
};
use std::sync::Arc;
use tracing::{debug, info};

pub struct BroadcastRelay {
    connections: Arc<ConnectionManager>,
}

impl BroadcastRelay {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    /// Frame sent to clients for a broadcast: error broadcasts become
    /// `error` envelopes, everything else an `event` named after the type.
    pub fn frame_for(event: &BroadcastEvent) -> Message {
        if event.is_error() {
            let code = event
                .payload
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or(ErrorCode::Error.as_str());
            let message = event
                .payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Message::Error(ErrorMessage::new(code, message, event.payload.clone()))
        } else {
            Message::Event(EventMessage::new(&event.event_type, event.payload.clone()))
        }
    }

    /// Writes the broadcast to every local, non-excluded recipient.
    ///
    /// # Returns
    ///
    /// The number of connections the frame was queued for.
    pub fn deliver(&self, event: &BroadcastEvent) -> usize {
        let text = Self::frame_for(event).to_json().to_string();
        let delivered = event
            .effective_recipients()
            .filter_map(|recipient| self.connections.get(recipient))
            .filter(|client| client.send_text(text.clone()).is_ok())
            .count();

        debug!(
            "📢 Broadcast '{}' delivered to {}/{} recipients",
            event.event_type,
            delivered,
            event.recipients.len()
        );
        delivered
    }

    /// Subscribes the relay to `channel` on `pubsub`.
    pub async fn attach(self: &Arc<Self>, pubsub: &dyn PubSub, channel: &str) -> Result<SubscriptionId, GatewayError> {
        let relay = Arc::clone(self);
        let handler: Arc<dyn MessageHandler> = Arc::new(move |message: String| {
            let relay = Arc::clone(&relay);
            async move {
                let event: BroadcastEvent = serde_json::from_str(&message)?;
                relay.deliver(&event);
                Ok::<(), anyhow::Error>(())
            }
        });

        let subscription = pubsub
            .subscribe(channel, handler)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        info!("📡 Broadcast relay listening on '{}'", channel);
        Ok(subscription)
    }
}
