//! Publishing client events to the routing core.
//!
//! Events that no local listener claims are wrapped as [`GatewayEvent`]s,
//! stamped with the user and room the connection is bound to, and published
//! on the processor's inbound channel.

use crate::connection::{ClientConnection, ROOM_ID_KEY, USER_ID_KEY};
use crate::error::GatewayError;
use courier_event_system::{ErrorMessage, EventMessage, GatewayEvent, PubSub, PubSubExt};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct EventForwarder {
    pubsub: Arc<dyn PubSub>,
    channel: String,
}

impl EventForwarder {
    pub fn new(pubsub: Arc<dyn PubSub>, channel: impl Into<String>) -> Self {
        Self {
            pubsub,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Builds the routed form of a client event.
    ///
    /// # Returns
    ///
    /// `None` when the connection has not been bound to a user.
    pub fn to_gateway_event(event: &EventMessage, client: &ClientConnection) -> Option<GatewayEvent> {
        let user_id = client.metadata_str(USER_ID_KEY)?;
        let mut gateway_event =
            GatewayEvent::new(&event.event_name, user_id, client.id(), event.payload.clone());
        gateway_event.timestamp = event.timestamp;
        if let Some(room_id) = client.metadata_str(ROOM_ID_KEY) {
            gateway_event = gateway_event.with_room(room_id);
        }
        Some(gateway_event)
    }

    /// Publishes the event on the inbound channel. Unbound connections are
    /// told they are unauthorized and nothing is published.
    pub async fn forward(&self, event: &EventMessage, client: &ClientConnection) -> Result<(), GatewayError> {
        let Some(gateway_event) = Self::to_gateway_event(event, client) else {
            warn!("⚠️ Client {} sent '{}' without a session", client.id(), event.event_name);
            return client.send_error(&ErrorMessage::unauthorized(Some("Join a session before sending events")));
        };

        self.pubsub
            .publish_json(&self.channel, &gateway_event)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        debug!("📡 Forwarded '{}' from client {} to {}", event.event_name, client.id(), self.channel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use courier_event_system::{MemoryBroker, MessageHandler};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    #[test]
    fn unbound_connections_have_no_gateway_event() {
        let (client, _outbound) = ClientConnection::new(None);
        assert!(EventForwarder::to_gateway_event(&EventMessage::new("a:b:c", json!({})), &client).is_none());
    }

    #[test]
    fn gateway_event_carries_session_binding() {
        let (client, _outbound) = ClientConnection::new(None);
        client.set_metadata(USER_ID_KEY, json!("u1"));
        client.set_metadata(ROOM_ID_KEY, json!("r1"));

        let event = EventMessage::new("chat:room:message", json!({"text": "hi"}));
        let gateway_event = EventForwarder::to_gateway_event(&event, &client).unwrap();
        assert_eq!(gateway_event.event_type, "chat:room:message");
        assert_eq!(gateway_event.user_id, "u1");
        assert_eq!(gateway_event.room_id.as_deref(), Some("r1"));
        assert_eq!(gateway_event.socket_id, client.id());
        assert_eq!(gateway_event.timestamp, event.timestamp);
        assert_eq!(gateway_event.payload["text"], "hi");
    }

    #[tokio::test]
    async fn unbound_forward_replies_unauthorized() {
        let broker = MemoryBroker::new();
        let forwarder = EventForwarder::new(Arc::new(broker.connect()), "events:inbound");
        let (client, mut outbound) = ClientConnection::new(None);

        forwarder
            .forward(&EventMessage::new("chat:room:message", json!({})), &client)
            .await
            .unwrap();

        match outbound.try_recv() {
            Ok(Outbound::Frame(WsMessage::Text(text))) => {
                let reply: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(reply["code"], "UNAUTHORIZED");
            }
            other => panic!("expected error frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn bound_forward_publishes_on_inbound_channel() {
        let broker = MemoryBroker::new();
        let listener = broker.connect();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let handler: Arc<dyn MessageHandler> = Arc::new(move |message: String| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(message);
                Ok::<(), anyhow::Error>(())
            }
        });
        listener.subscribe("events:inbound", handler).await.unwrap();

        let forwarder = EventForwarder::new(Arc::new(broker.connect()), "events:inbound");
        let (client, _outbound) = ClientConnection::new(None);
        client.set_metadata(USER_ID_KEY, json!("u1"));

        forwarder
            .forward(&EventMessage::new("chat:room:message", json!({"text": "hi"})), &client)
            .await
            .unwrap();

        let raw = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let published: GatewayEvent = serde_json::from_str(&raw).unwrap();
        assert_eq!(published.user_id, "u1");
        assert_eq!(published.socket_id, client.id());
        assert!(published.room_id.is_none());
    }
}
