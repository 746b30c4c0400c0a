//! Connection handling logic for WebSocket clients.
//!
//! This module contains the core connection handling logic that manages
//! the lifecycle of individual client connections, including WebSocket
//! handshaking, frame processing, and cleanup.

use crate::{
    connection::{ClientConnection, ConnectionManager, Outbound},
    error::GatewayError,
    messaging::MessageRouter,
};
use tokio::sync::OwnedSemaphorePermit;
use courier_event_system::{ErrorMessage, EventMessage};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{accept_async_with_config, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Handles a single client connection from establishment to cleanup.
///
/// # Connection Flow
///
/// 1. Perform WebSocket handshake
/// 2. Register the connection with the connection manager
/// 3. Send the `connected` welcome event carrying the connection id
/// 4. Run the incoming (frame routing) and outgoing (queue draining) halves
///    until either ends
/// 5. Remove the connection and run its disconnect callbacks
///
/// # Arguments
///
/// * `stream` - The TCP stream for the client connection
/// * `addr` - The remote address of the client
/// * `connections` - Registry of live connections
/// * `router` - Frame router shared by all connections
/// * `max_message_size` - Largest accepted message in bytes, enforced while
///   reading
/// * `_slot` - Connection-limit reservation, released when this returns
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    connections: Arc<ConnectionManager>,
    router: Arc<MessageRouter>,
    max_message_size: usize,
    _slot: OwnedSemaphorePermit,
) -> Result<(), GatewayError> {
    let ws_config = WebSocketConfig::default()
        .max_message_size(Some(max_message_size))
        .max_frame_size(Some(max_message_size));

    // Perform WebSocket handshake
    let ws_stream = accept_async_with_config(stream, Some(ws_config))
        .await
        .map_err(|e| GatewayError::Network(format!("WebSocket handshake failed: {e}")))?;

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (client, mut outbound) = ClientConnection::new(Some(addr));
    let client_id = client.id();
    connections.add(Arc::clone(&client));
    info!("🔗 Connection {} established from {}", client_id, addr);

    let welcome = EventMessage::new("connected", json!({ "clientId": client_id }));
    if let Err(e) = client.send_event(&welcome) {
        debug!("Failed to queue welcome for {}: {}", client_id, e);
    }

    // Incoming frame task - routes client frames. `None` hands the close
    // over to the outgoing half so queued frames are flushed first.
    let incoming_task = {
        let client = Arc::clone(&client);
        async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        router.route_client_message(text.as_str(), &client).await;
                    }
                    Ok(Message::Binary(_)) => {
                        MessageRouter::reply_error(&client, &ErrorMessage::validation("Invalid message format"));
                    }
                    Ok(Message::Ping(data)) => {
                        if let Err(e) = client.send_frame(Message::Pong(data)) {
                            debug!("Dropping pong for {}: {}", client.id(), e);
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        debug!("🔌 Client {} requested close", client.id());
                        return Some(
                            frame
                                .map(|frame| frame.reason.as_str().to_string())
                                .filter(|reason| !reason.is_empty())
                                .unwrap_or_else(|| "client closed".to_string()),
                        );
                    }
                    Err(WsError::Capacity(e)) => {
                        // The rest of the oversized frame is still on the wire.
                        warn!("⚠️ Client {} exceeded the message limit: {}", client.id(), e);
                        MessageRouter::reply_error(
                            &client,
                            &ErrorMessage::validation(format!(
                                "Message exceeds maximum size of {} bytes",
                                max_message_size
                            )),
                        );
                        client.disconnect("Message too big");
                        return None;
                    }
                    Err(e) => {
                        client.notify_error(&e.to_string());
                        return Some("transport error".to_string());
                    }
                    _ => {}
                }
            }
            Some("connection dropped".to_string())
        }
    };

    // Outgoing frame task - drains the connection's queue
    let outgoing_task = async move {
        while let Some(item) = outbound.recv().await {
            match item {
                Outbound::Frame(frame) => {
                    if let Err(e) = ws_sender.send(frame).await {
                        error!("Failed to send message: {}", e);
                        return "write failed".to_string();
                    }
                }
                Outbound::Close(reason) => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: reason.clone().into(),
                    };
                    let _ = ws_sender.send(Message::Close(Some(frame))).await;
                    return reason;
                }
            }
        }
        "connection dropped".to_string()
    };

    tokio::pin!(incoming_task, outgoing_task);

    // Run both tasks concurrently until one completes
    let reason = tokio::select! {
        reason = &mut incoming_task => match reason {
            Some(reason) => reason,
            None => outgoing_task.await,
        },
        reason = &mut outgoing_task => reason,
    };

    connections.remove(&client_id);
    client.notify_disconnect(&reason);
    Ok(())
}
