//! Message routing logic for dispatching client frames.
//!
//! This module parses incoming text frames, validates them structurally and
//! hands them to the request registry, the local event listeners or the
//! event forwarder.

use super::{EventListenerRegistry, RequestRegistry};
use crate::connection::ClientConnection;
use crate::forwarder::EventForwarder;
use courier_event_system::protocol::validator;
use courier_event_system::{handle_error, ErrorMessage, EventMessage, Message, Request, Value};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, trace, warn};

/// Frame router shared by every connection of a gateway.
#[derive(Default)]
pub struct MessageRouter {
    requests: RequestRegistry,
    listeners: EventListenerRegistry,
    forwarder: RwLock<Option<Arc<EventForwarder>>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> &RequestRegistry {
        &self.requests
    }

    pub fn listeners(&self) -> &EventListenerRegistry {
        &self.listeners
    }

    /// Events with no local listener are handed to `forwarder`.
    pub fn set_forwarder(&self, forwarder: Arc<EventForwarder>) {
        *self.forwarder.write().unwrap_or_else(PoisonError::into_inner) = Some(forwarder);
    }

    fn forwarder(&self) -> Option<Arc<EventForwarder>> {
        self.forwarder.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Routes a raw client frame.
    ///
    /// # Message Flow
    ///
    /// 1. Parse the text as JSON and validate it structurally
    /// 2. `request` frames go to the request registry; the response is sent back
    /// 3. `event` frames go to the local listeners, or to the forwarder when
    ///    no listener exists
    /// 4. Anything that fails steps 1-2 is answered with a `VALIDATION_ERROR`
    pub async fn route_client_message(&self, text: &str, client: &Arc<ClientConnection>) {
        let message = match Self::decode(text) {
            Some(message) => message,
            None => {
                debug!("Rejecting malformed frame from client {}", client.id());
                Self::reply_error(client, &ErrorMessage::validation("Invalid message format"));
                return;
            }
        };

        match message {
            Message::Request(request) => self.handle_request(request, client).await,
            Message::Event(event) => self.handle_event(event, client).await,
            Message::Response(response) => {
                trace!("Ignoring response {} from client {}", response.id, client.id());
            }
            Message::Error(error) => {
                debug!("Client {} reported error {}: {}", client.id(), error.code, error.message);
            }
        }
    }

    fn decode(text: &str) -> Option<Message> {
        let data: Value = serde_json::from_str(text).ok()?;
        if !validator::validate(&data) {
            return None;
        }
        Message::from_json(data).ok()
    }

    async fn handle_request(&self, request: Request, client: &Arc<ClientConnection>) {
        debug!("📨 Request '{}' ({}) from client {}", request.action, request.id, client.id());
        let response = self.requests.handle(request, Arc::clone(client)).await;
        if let Err(e) = client.send_response(&response) {
            debug!("Dropping response {}: {}", response.request_id, e);
        }
    }

    async fn handle_event(&self, event: EventMessage, client: &Arc<ClientConnection>) {
        debug!("📨 Event '{}' from client {}", event.event_name, client.id());
        if self.listeners.dispatch(&event, client).await > 0 {
            return;
        }

        match self.forwarder() {
            Some(forwarder) => {
                if let Err(e) = forwarder.forward(&event, client).await {
                    let context = format!("event:{}", event.event_name);
                    Self::reply_error(client, &handle_error(&e, &context));
                }
            }
            None => warn!("⚠️ No listener for event '{}'", event.event_name),
        }
    }

    pub(crate) fn reply_error(client: &ClientConnection, error: &ErrorMessage) {
        if let Err(e) = client.send_error(error) {
            debug!("Dropping error reply: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Outbound;
    use courier_event_system::Response;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    fn next_frame(outbound: &mut UnboundedReceiver<Outbound>) -> Value {
        match outbound.try_recv() {
            Ok(Outbound::Frame(WsMessage::Text(text))) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_frames_get_validation_errors() {
        let router = MessageRouter::new();
        let (client, mut outbound) = ClientConnection::new(None);

        for frame in [
            "not json",
            r#"{"type":"request","id":"1","timestamp":1}"#,
            r#"{"type":"bogus","id":"1","timestamp":1}"#,
            r#"{"type":"event","id":"1","timestamp":"now","eventName":"x"}"#,
        ] {
            router.route_client_message(frame, &client).await;
            let reply = next_frame(&mut outbound);
            assert_eq!(reply["type"], "error", "frame {}", frame);
            assert_eq!(reply["code"], "VALIDATION_ERROR");
            assert_eq!(reply["message"], "Invalid message format");
        }
    }

    #[tokio::test]
    async fn requests_are_answered() {
        let router = MessageRouter::new();
        router
            .requests()
            .register(
                "math:add",
                Arc::new(|request: Request, _client: Arc<ClientConnection>| async move {
                    let a = request.payload["a"].as_i64().unwrap_or_default();
                    let b = request.payload["b"].as_i64().unwrap_or_default();
                    Ok::<_, anyhow::Error>(Response::success(request.id, json!({"sum": a + b})))
                }),
            )
            .unwrap();
        let (client, mut outbound) = ClientConnection::new(None);

        let request = Request::new("math:add", json!({"a": 2, "b": 3}));
        router
            .route_client_message(&request.to_json().to_string(), &client)
            .await;

        let reply = next_frame(&mut outbound);
        assert_eq!(reply["type"], "response");
        assert_eq!(reply["requestId"], request.id.as_str());
        assert_eq!(reply["success"], true);
        assert_eq!(reply["payload"]["sum"], 5);
    }

    #[tokio::test]
    async fn responses_and_errors_from_clients_are_ignored() {
        let router = MessageRouter::new();
        let (client, mut outbound) = ClientConnection::new(None);

        let response = Response::success("r1", json!({}));
        router
            .route_client_message(&response.to_json().to_string(), &client)
            .await;
        let error = ErrorMessage::validation("bad");
        router.route_client_message(&error.to_json().to_string(), &client).await;

        assert!(outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn events_without_listener_or_forwarder_are_dropped() {
        let router = MessageRouter::new();
        let (client, mut outbound) = ClientConnection::new(None);

        let event = EventMessage::new("chat:room:message", json!({}));
        router.route_client_message(&event.to_json().to_string(), &client).await;
        assert!(outbound.try_recv().is_err());
    }
}
