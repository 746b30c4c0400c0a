//! # Courier Gateway
//!
//! The WebSocket edge of Courier. The gateway terminates client connections,
//! answers request frames through registered handlers, hands event frames to
//! local listeners or forwards them to the routing core, and delivers the
//! core's broadcasts back to the connections they address.
//!
//! ## Architecture Overview
//!
//! * **Connection Manager** - live registry of [`ClientConnection`]s, each
//!   with its own metadata, rooms and outbound frame queue
//! * **Message Router** - validates frames and dispatches requests, events
//!   and the ignored response/error kinds
//! * **Event Forwarder** - publishes unclaimed client events as
//!   `GatewayEvent`s on the processor's inbound channel
//! * **Broadcast Relay** - subscribes to the outbound channel and writes
//!   each `BroadcastEvent` to local recipients
//! * **Session Binder** - `session:join` / `session:leave` requests that map
//!   (user, room) to a connection in the session cache
//!
//! ### Message Flow
//!
//! 1. Client connects and receives `{"type":"event","eventName":"connected","payload":{"clientId":..}}`
//! 2. Client sends a `request`, `event`, `response` or `error` envelope
//! 3. Requests are answered with a correlated `response`
//! 4. Events reach local listeners, or the routing core via the forwarder
//! 5. Malformed frames are answered with a `VALIDATION_ERROR` error envelope
//!
//! ## Error Handling
//!
//! The gateway uses [`GatewayError`] to categorize failures:
//!
//! * **Network errors** - binding, handshake and closed-connection issues
//! * **Internal errors** - transport failures while forwarding or relaying

// Re-export core types and functions for easy access
pub use config::GatewayConfig;
pub use connection::{ClientConnection, ConnectionManager, Outbound, ROOM_ID_KEY, USER_ID_KEY};
pub use error::GatewayError;
pub use forwarder::EventForwarder;
pub use messaging::{EventListener, MessageRouter, RequestHandler};
pub use relay::BroadcastRelay;
pub use server::GatewayServer;
pub use session::{SessionBinder, JOIN_ACTION, LEAVE_ACTION};
pub use utils::{create_gateway, create_gateway_with_config};

// Public module declarations
pub mod config;
pub mod connection;
pub mod error;
pub mod forwarder;
pub mod messaging;
pub mod relay;
pub mod server;
pub mod session;
pub mod utils;
