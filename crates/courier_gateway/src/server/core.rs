//! Core gateway server implementation.
//!
//! This module contains the main `GatewayServer` struct: the accept loop,
//! handler registration, and the local emit surface over live connections.

use crate::{
    config::GatewayConfig,
    connection::{ClientConnection, ConnectionManager},
    error::GatewayError,
    forwarder::EventForwarder,
    messaging::{EventListener, MessageRouter, RequestHandler},
    server::handlers::handle_connection,
};
use courier_event_system::EventMessage;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};
use tracing::{error, info, warn};

/// The WebSocket connection gateway.
///
/// # Architecture
///
/// * **Connection Management**: live registry of [`ClientConnection`]s
/// * **Message Router**: request handlers, local event listeners and the
///   optional [`EventForwarder`] for events bound for the routing core
/// * **Accept Loop**: one task per accepted socket, stopped through an
///   internal shutdown channel
pub struct GatewayServer {
    /// Gateway configuration settings
    config: GatewayConfig,

    /// Registry of live client connections
    connections: Arc<ConnectionManager>,

    /// Frame router shared by every connection
    router: Arc<MessageRouter>,

    /// One permit per allowed connection, held from accept until close
    slots: Arc<Semaphore>,

    /// Channel for coordinating server shutdown
    shutdown_sender: broadcast::Sender<()>,

    stopping: AtomicBool,
}

impl GatewayServer {
    /// Creates a new gateway with the specified configuration.
    pub fn new(config: GatewayConfig) -> Self {
        let (shutdown_sender, _) = broadcast::channel(1);
        Self {
            slots: Arc::new(Semaphore::new(config.max_connections.min(Semaphore::MAX_PERMITS))),
            config,
            connections: Arc::new(ConnectionManager::new()),
            router: Arc::new(MessageRouter::new()),
            shutdown_sender,
            stopping: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Shared handle on the connection registry.
    pub fn connections(&self) -> Arc<ConnectionManager> {
        Arc::clone(&self.connections)
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Registers the handler for a request action. One handler per action.
    pub fn register_request_handler<H: RequestHandler>(&self, action: &str, handler: H) -> Result<(), GatewayError> {
        self.router.requests().register(action, Arc::new(handler))
    }

    /// Adds a listener for a client event name.
    pub fn register_event_listener<L: EventListener>(&self, event_name: &str, listener: L) {
        self.router.listeners().register(event_name, Arc::new(listener));
    }

    /// Events without a local listener are forwarded through `forwarder`.
    pub fn set_forwarder(&self, forwarder: EventForwarder) {
        self.router.set_forwarder(Arc::new(forwarder));
    }

    /// Binds the configured address and runs the accept loop until
    /// [`stop`](Self::stop) is called.
    pub async fn start(&self) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(self.config.bind_address)
            .await
            .map_err(|e| GatewayError::Network(format!("Failed to bind {}: {e}", self.config.bind_address)))?;
        self.serve(listener).await
    }

    /// Runs the accept loop on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GatewayError> {
        let local_addr = listener
            .local_addr()
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        info!("🚀 Gateway listening on {}", local_addr);

        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        if self.stopping.load(Ordering::SeqCst) {
            info!("🛑 Accept loop not started - shutdown already requested");
            return Ok(());
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept(stream, addr),
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        break;
                    }
                },
                _ = shutdown_receiver.recv() => {
                    info!("🛑 Accept loop stopping - shutdown initiated");
                    break;
                }
            }
        }

        info!("✅ Gateway on {} stopped", local_addr);
        Ok(())
    }

    fn accept(&self, stream: tokio::net::TcpStream, addr: SocketAddr) {
        let Ok(slot) = Arc::clone(&self.slots).try_acquire_owned() else {
            warn!(
                "⚠️ Refusing {}: connection limit {} reached",
                addr, self.config.max_connections
            );
            return;
        };

        let connections = Arc::clone(&self.connections);
        let router = Arc::clone(&self.router);
        let max_message_size = self.config.max_message_size;

        // Spawn individual connection handler
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, connections, router, max_message_size, slot).await {
                error!("Connection error: {:?}", e);
            }
        });
    }

    /// Disconnects every client with "Server shutting down" and stops the
    /// accept loop.
    pub fn stop(&self) {
        info!("🛑 Stopping gateway, disconnecting {} client(s)", self.connections.count());
        self.stopping.store(true, Ordering::SeqCst);
        self.connections.disconnect_all("Server shutting down");
        let _ = self.shutdown_sender.send(());
    }

    pub fn get_client(&self, client_id: &str) -> Option<Arc<ClientConnection>> {
        self.connections.get(client_id)
    }

    pub fn get_clients(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.clients()
    }

    pub fn get_connected_clients_count(&self) -> usize {
        self.connections.count()
    }

    pub fn emit_to_client(&self, client_id: &str, event: &EventMessage) -> bool {
        self.connections.emit_to_client(client_id, event)
    }

    pub fn emit_to_all(&self, event: &EventMessage) -> usize {
        self.connections.emit_to_all(event)
    }

    pub fn emit_to_room(&self, room: &str, event: &EventMessage) -> usize {
        self.connections.emit_to_room(room, event)
    }
}
