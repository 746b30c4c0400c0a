//! # Event Definitions
//!
//! Routed domain events, broadcasts and the handler seam business logic
//! plugs into.
//!
//! ## Flow
//!
//! A gateway publishes a [`GatewayEvent`] on the inbound channel. The
//! processor parses its `eventType`, hands an [`EventContext`] to the
//! registered [`EventHandler`], and publishes whatever [`BroadcastEvent`]s
//! the handler returns on the outbound channel.

use crate::error::ErrorCode;
use crate::types::EventRoute;
use crate::utils::current_timestamp;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;

/// A client-originated domain event in its canonical routed form.
///
/// The route triple is optional on the wire; the processor fills it in once
/// `event_type` has been parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEvent {
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    pub user_id: String,
    pub socket_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default = "current_timestamp")]
    pub timestamp: u64,
}

impl GatewayEvent {
    pub fn new(
        event_type: impl Into<String>,
        user_id: impl Into<String>,
        socket_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            service_name: None,
            module: None,
            event_name: None,
            user_id: user_id.into(),
            socket_id: socket_id.into(),
            room_id: None,
            payload,
            timestamp: current_timestamp(),
        }
    }

    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    /// Records the parsed route triple on the event.
    pub fn annotate(&mut self, route: EventRoute) {
        self.service_name = Some(route.service_name);
        self.module = Some(route.module);
        self.event_name = Some(route.event_name);
    }
}

/// A pending fan-out: `payload` tagged with `type`, addressed to connection
/// ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub recipients: Vec<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_socket_ids: Option<Vec<String>>,
}

impl BroadcastEvent {
    /// Broadcast type used for errors addressed to the originating socket.
    pub const ERROR_TYPE: &'static str = "error";

    pub fn new(event_type: impl Into<String>, recipients: Vec<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            recipients,
            payload,
            exclude_socket_ids: None,
        }
    }

    /// Error broadcast to a single socket with payload `{code, message}`.
    pub fn error(socket_id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(
            Self::ERROR_TYPE,
            vec![socket_id.into()],
            json!({ "code": code.as_str(), "message": message.into() }),
        )
    }

    /// Adds `key` to an object payload. Non-object payloads are left untouched.
    pub fn with_payload_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Some(map) = self.payload.as_object_mut() {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn with_exclusions(mut self, exclude_socket_ids: Vec<String>) -> Self {
        self.exclude_socket_ids = Some(exclude_socket_ids);
        self
    }

    pub fn is_error(&self) -> bool {
        self.event_type == Self::ERROR_TYPE
    }

    pub fn is_excluded(&self, socket_id: &str) -> bool {
        self.exclude_socket_ids
            .as_ref()
            .is_some_and(|ids| ids.iter().any(|id| id == socket_id))
    }

    /// Recipients with excluded ids removed, in their original order.
    pub fn effective_recipients(&self) -> impl Iterator<Item = &str> {
        self.recipients
            .iter()
            .map(String::as_str)
            .filter(move |id| !self.is_excluded(id))
    }
}

/// Everything a handler needs to know about one inbound event.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub event: GatewayEvent,
    pub user_id: String,
    pub socket_id: String,
    pub room_id: Option<String>,
}

impl From<GatewayEvent> for EventContext {
    fn from(event: GatewayEvent) -> Self {
        Self {
            user_id: event.user_id.clone(),
            socket_id: event.socket_id.clone(),
            room_id: event.room_id.clone(),
            event,
        }
    }
}

/// What a handler produced: nothing, one broadcast, or an ordered list.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum HandlerOutput {
    #[default]
    None,
    One(BroadcastEvent),
    Many(Vec<BroadcastEvent>),
}

impl HandlerOutput {
    pub fn into_vec(self) -> Vec<BroadcastEvent> {
        match self {
            HandlerOutput::None => Vec::new(),
            HandlerOutput::One(event) => vec![event],
            HandlerOutput::Many(events) => events,
        }
    }
}

impl From<()> for HandlerOutput {
    fn from(_: ()) -> Self {
        HandlerOutput::None
    }
}

impl From<BroadcastEvent> for HandlerOutput {
    fn from(event: BroadcastEvent) -> Self {
        HandlerOutput::One(event)
    }
}

impl From<Vec<BroadcastEvent>> for HandlerOutput {
    fn from(events: Vec<BroadcastEvent>) -> Self {
        HandlerOutput::Many(events)
    }
}

impl From<Option<BroadcastEvent>> for HandlerOutput {
    fn from(event: Option<BroadcastEvent>) -> Self {
        event.map_or(HandlerOutput::None, HandlerOutput::One)
    }
}

/// Business logic registered for one literal event type.
///
/// Closures of the form `Fn(EventContext) -> impl Future<Output =
/// anyhow::Result<HandlerOutput>>` implement this trait automatically.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handles one event. Errors are converted into an
    /// `EVENT_PROCESSING_ERROR` broadcast to the originating socket.
    async fn handle(&self, ctx: EventContext) -> anyhow::Result<HandlerOutput>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(EventContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<HandlerOutput>> + Send + 'static,
{
    async fn handle(&self, ctx: EventContext) -> anyhow::Result<HandlerOutput> {
        (self)(ctx).await
    }
}

// Tests module
mod tests;
