//! # Courier Event System
//!
//! The routing core of Courier: wire envelopes, the pub/sub transport used
//! for cross-process fan-out, the session and auth provider seams, and the
//! [`EventProcessor`] that ties them together.
//!
//! ## Architecture Overview
//!
//! - **Protocol** ([`protocol`]): request/response/event/error envelopes,
//!   structural validators, and the `serviceName:module:eventName` grammar
//! - **Transport** ([`pubsub`]): publish/subscribe over Redis or an
//!   in-process broker, with reconnect and resubscription
//! - **Providers** ([`providers`]): (user, room) → connection id mapping and
//!   permission / room-membership checks
//! - **Processor** ([`EventProcessor`]): consumes [`GatewayEvent`]s from the
//!   inbound channel, runs business handlers and publishes
//!   [`BroadcastEvent`]s on the outbound channel
//!
//! ## Quick Start Example
//!
//! ```rust,no_run
//! use courier_event_system::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pubsub = Arc::new(RedisPubSub::connect("redis://127.0.0.1/", RetryPolicy::default()).await?);
//!     let auth = Arc::new(MemoryAuthProvider::new());
//!     let processor = create_event_processor(pubsub, ProcessorConfig::default(), auth);
//!
//!     processor.register_event_handler("notes:board:moved", |ctx: EventContext| async move {
//!         let note = BroadcastEvent::new("note_moved", vec![ctx.socket_id], ctx.event.payload);
//!         Ok::<_, anyhow::Error>(HandlerOutput::from(note))
//!     })?;
//!
//!     processor.start().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod events;
pub mod protocol;
pub mod providers;
pub mod pubsub;
pub mod system;
pub mod types;
pub mod utils;

pub use error::{handle_error, ErrorCode, EventError, ProtocolError, ProviderError, TransportError};
pub use events::{BroadcastEvent, EventContext, EventHandler, GatewayEvent, HandlerOutput};
pub use protocol::{ErrorMessage, EventMessage, Message, Request, Response};
pub use providers::{AuthProvider, MemoryAuthProvider, MemorySessionCache, RedisSessionCache, SessionCache};
pub use pubsub::{
    MemoryBroker, MemoryPubSub, MessageHandler, PubSub, PubSubExt, RedisPubSub, RetryPolicy,
    SubscriptionId,
};
pub use system::{create_event_processor, EventProcessor, ProcessorConfig};
pub use types::{ClientInfo, ConnectionStatus, EventRoute, MessageType};
pub use utils::{current_timestamp, generate_message_id};

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use serde_json::Value;
