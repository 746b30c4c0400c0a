//! Client connection representation and management.
//!
//! A [`ClientConnection`] is the gateway's handle on one WebSocket peer. It
//! owns the connection bookkeeping ([`ClientInfo`]), the rooms the client has
//! joined, and the sending half of the outbound frame queue that the
//! connection's writer task drains.

use courier_event_system::{
    ClientInfo, ConnectionStatus, ErrorMessage, EventMessage, Message, Response, Value,
};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{error, info};

use crate::error::GatewayError;

/// Metadata key holding the user a connection is bound to.
pub const USER_ID_KEY: &str = "userId";
/// Metadata key holding the room a connection is bound to.
pub const ROOM_ID_KEY: &str = "roomId";

/// Work item for a connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    /// A frame to write as-is.
    Frame(WsMessage),
    /// Send a close frame with the given reason and stop writing.
    Close(String),
}

type DisconnectCallback = Box<dyn Fn(&ClientConnection, &str) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&ClientConnection, &str) + Send + Sync>;

/// Represents an individual client connection to the gateway.
///
/// Frames are never written directly; every send enqueues an [`Outbound`]
/// item which the writer task for this connection flushes in order.
pub struct ClientConnection {
    /// The remote network address of the client, when known
    remote_addr: Option<SocketAddr>,
    info: RwLock<ClientInfo>,
    rooms: RwLock<HashSet<String>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    on_disconnect: RwLock<Vec<DisconnectCallback>>,
    on_error: RwLock<Vec<ErrorCallback>>,
    disconnect_notified: AtomicBool,
}

impl ClientConnection {
    /// Creates a new connected client with a fresh uuid id.
    ///
    /// # Returns
    ///
    /// The shared connection and the receiving end of its outbound queue,
    /// which the caller hands to the connection's writer task.
    pub fn new(remote_addr: Option<SocketAddr>) -> (std::sync::Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        let client = Self {
            remote_addr,
            info: RwLock::new(ClientInfo::new(uuid::Uuid::new_v4().to_string())),
            rooms: RwLock::new(HashSet::new()),
            outbound,
            on_disconnect: RwLock::new(Vec::new()),
            on_error: RwLock::new(Vec::new()),
            disconnect_notified: AtomicBool::new(false),
        };
        (std::sync::Arc::new(client), receiver)
    }

    pub fn id(&self) -> String {
        self.read_info().id.clone()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Snapshot of the connection bookkeeping.
    pub fn info(&self) -> ClientInfo {
        self.read_info().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.read_info().status
    }

    /// True while the writer task is alive and the status is `Connected`.
    pub fn is_connected(&self) -> bool {
        !self.outbound.is_closed() && self.status() == ConnectionStatus::Connected
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: Value) {
        self.write_info().metadata.insert(key.into(), value);
    }

    pub fn get_metadata(&self, key: &str) -> Option<Value> {
        self.read_info().metadata.get(key).cloned()
    }

    pub fn remove_metadata(&self, key: &str) -> Option<Value> {
        self.write_info().metadata.remove(key)
    }

    /// Metadata value as a string, if present and a JSON string.
    pub fn metadata_str(&self, key: &str) -> Option<String> {
        self.read_info()
            .metadata
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Adds the client to a room. Returns false if it was already a member.
    pub fn join_room(&self, room: impl Into<String>) -> bool {
        self.rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(room.into())
    }

    pub fn leave_room(&self, room: &str) -> bool {
        self.rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(room)
    }

    pub fn in_room(&self, room: &str) -> bool {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(room)
    }

    pub fn rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        rooms.sort();
        rooms
    }

    /// Queues a raw text frame.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), GatewayError> {
        self.send_frame(WsMessage::text(text.into()))
    }

    pub fn send_response(&self, response: &Response) -> Result<(), GatewayError> {
        self.send_text(response.to_json().to_string())
    }

    pub fn send_event(&self, event: &EventMessage) -> Result<(), GatewayError> {
        self.send_text(event.to_json().to_string())
    }

    pub fn send_error(&self, error: &ErrorMessage) -> Result<(), GatewayError> {
        self.send_text(error.to_json().to_string())
    }

    pub fn send_message(&self, message: &Message) -> Result<(), GatewayError> {
        self.send_text(message.to_json().to_string())
    }

    /// Queues any WebSocket frame, including control frames.
    pub(crate) fn send_frame(&self, frame: WsMessage) -> Result<(), GatewayError> {
        if !self.is_connected() {
            return Err(GatewayError::Network(format!(
                "Client {} is not connected",
                self.id()
            )));
        }
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| GatewayError::Network(format!("Client {} is not connected", self.id())))
    }

    /// Marks the client disconnected and asks the writer to close the socket.
    pub fn disconnect(&self, reason: &str) {
        let was_connected = {
            let mut info = self.write_info();
            let was_connected = info.status == ConnectionStatus::Connected;
            info.status = ConnectionStatus::Disconnected;
            was_connected
        };
        if was_connected {
            info!("🔌 Disconnecting client {}: {}", self.id(), reason);
        }
        // Writer may already be gone; nothing left to close then.
        let _ = self.outbound.send(Outbound::Close(reason.to_string()));
    }

    /// Registers a callback run once when the connection goes away.
    pub fn on_disconnect<F>(&self, callback: F)
    where
        F: Fn(&ClientConnection, &str) + Send + Sync + 'static,
    {
        self.on_disconnect
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(callback));
    }

    /// Registers a callback run for every transport error on the connection.
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&ClientConnection, &str) + Send + Sync + 'static,
    {
        self.on_error
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(callback));
    }

    /// Records the disconnect and runs the disconnect callbacks. Only the
    /// first call has any effect.
    pub fn notify_disconnect(&self, reason: &str) {
        if self.disconnect_notified.swap(true, Ordering::SeqCst) {
            return;
        }
        self.write_info().status = ConnectionStatus::Disconnected;
        info!("🔌 Client {} disconnected: {}", self.id(), reason);

        let callbacks = self.on_disconnect.read().unwrap_or_else(PoisonError::into_inner);
        for callback in callbacks.iter() {
            callback(self, reason);
        }
    }

    /// Logs a transport error and runs the error callbacks. The status is
    /// left untouched.
    pub fn notify_error(&self, message: &str) {
        error!("❌ Client {} error: {}", self.id(), message);

        let callbacks = self.on_error.read().unwrap_or_else(PoisonError::into_inner);
        for callback in callbacks.iter() {
            callback(self, message);
        }
    }

    fn read_info(&self) -> std::sync::RwLockReadGuard<'_, ClientInfo> {
        self.info.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_info(&self) -> std::sync::RwLockWriteGuard<'_, ClientInfo> {
        self.info.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("info", &self.info())
            .field("remote_addr", &self.remote_addr)
            .field("rooms", &self.rooms())
            .finish()
    }
}
