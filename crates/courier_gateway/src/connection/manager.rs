//! Connection manager for tracking and managing client connections.
//!
//! This module provides the live registry of connected clients together with
//! the local emit helpers (single client, every client, one room).

use super::client::ClientConnection;
use courier_event_system::EventMessage;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Central registry of all live client connections, keyed by connection id.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    clients: DashMap<String, Arc<ClientConnection>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection to the registry.
    pub fn add(&self, client: Arc<ClientConnection>) {
        let id = client.id();
        info!("🔗 Client {} registered", id);
        self.clients.insert(id, client);
    }

    /// Removes a connection from the registry.
    ///
    /// # Returns
    ///
    /// The removed connection, or `None` if the id was not registered.
    pub fn remove(&self, client_id: &str) -> Option<Arc<ClientConnection>> {
        let removed = self.clients.remove(client_id).map(|(_, client)| client);
        if removed.is_some() {
            info!("🔌 Client {} removed", client_id);
        }
        removed
    }

    pub fn get(&self, client_id: &str) -> Option<Arc<ClientConnection>> {
        self.clients.get(client_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn clients(&self) -> Vec<Arc<ClientConnection>> {
        self.clients.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Sends an event to one client. Returns whether it was queued.
    pub fn emit_to_client(&self, client_id: &str, event: &EventMessage) -> bool {
        match self.get(client_id) {
            Some(client) => client.send_event(event).is_ok(),
            None => {
                debug!("Client {} not found for event {}", client_id, event.event_name);
                false
            }
        }
    }

    /// Sends an event to every connected client.
    ///
    /// # Returns
    ///
    /// The number of clients the event was queued for.
    pub fn emit_to_all(&self, event: &EventMessage) -> usize {
        let text = event.to_json().to_string();
        self.clients()
            .iter()
            .filter(|client| client.send_text(text.clone()).is_ok())
            .count()
    }

    /// Sends an event to every client that joined `room`.
    pub fn emit_to_room(&self, room: &str, event: &EventMessage) -> usize {
        let text = event.to_json().to_string();
        self.clients()
            .iter()
            .filter(|client| client.in_room(room))
            .filter(|client| client.send_text(text.clone()).is_ok())
            .count()
    }

    /// Disconnects every client with the same reason.
    pub fn disconnect_all(&self, reason: &str) {
        for client in self.clients() {
            client.disconnect(reason);
        }
    }
}
