//! Main application logic and lifecycle management.
//!
//! This module contains the core `Application` struct that wires the
//! transport, the event processor and the gateway together and drives
//! startup and shutdown.

use crate::config::{AppConfig, TransportBackend};
use crate::{logging::display_banner, signals::setup_signal_handlers};
use courier_event_system::{
    current_timestamp, BroadcastEvent, EventContext, EventError, EventProcessor, HandlerOutput,
    MemoryAuthProvider, MemoryBroker, MemoryPubSub, MemorySessionCache, PubSub, RedisPubSub,
    RedisSessionCache, SessionCache,
};
use courier_gateway::{
    create_gateway_with_config, BroadcastRelay, EventForwarder, GatewayServer, SessionBinder,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Liveness check answered by the processor to the sending connection.
pub const HEALTH_PING_EVENT: &str = "system:health:ping";
pub const HEALTH_PONG_EVENT: &str = "health_pong";

/// Connections for one process: one transport per side so the gateway and
/// processor can be torn down independently.
struct Transports {
    processor: Arc<dyn PubSub>,
    gateway: Arc<dyn PubSub>,
    sessions: Arc<dyn SessionCache>,
}

async fn connect_transports(config: &AppConfig) -> Result<Transports, Box<dyn std::error::Error>> {
    match config.transport.backend {
        TransportBackend::Memory => {
            let broker = MemoryBroker::new();
            Ok(Transports {
                processor: Arc::new(MemoryPubSub::new(broker.clone())),
                gateway: Arc::new(MemoryPubSub::new(broker)),
                sessions: Arc::new(MemorySessionCache::new()),
            })
        }
        TransportBackend::Redis => {
            let url = config.transport.url.as_str();
            info!("🔌 Connecting to Redis at {}", url);
            let processor = RedisPubSub::connect(url, config.retry_policy()).await?;
            let gateway = RedisPubSub::connect(url, config.retry_policy()).await?;
            let sessions = RedisSessionCache::with_prefix(url, &config.session.key_prefix)?;
            Ok(Transports {
                processor: Arc::new(processor),
                gateway: Arc::new(gateway),
                sessions: Arc::new(sessions),
            })
        }
    }
}

fn register_system_handlers(processor: &EventProcessor) -> Result<(), EventError> {
    processor.register_event_handler(HEALTH_PING_EVENT, |ctx: EventContext| async move {
        let pong = BroadcastEvent::new(
            HEALTH_PONG_EVENT,
            vec![ctx.socket_id],
            json!({ "timestamp": current_timestamp(), "echo": ctx.event.payload }),
        );
        Ok::<_, anyhow::Error>(HandlerOutput::from(pong))
    })
}

/// Main application struct.
///
/// # Architecture
///
/// * **Processor**: consumes client events from the inbound channel
/// * **Gateway**: terminates WebSocket clients and forwards their events
/// * **Relay**: delivers processor broadcasts to local connections
/// * **Session Binder**: maps (user, room) to connections in the session cache
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    gateway: Arc<GatewayServer>,
    processor: Arc<EventProcessor>,
    relay: Arc<BroadcastRelay>,
    gateway_transport: Arc<dyn PubSub>,
}

impl Application {
    /// Creates a new application instance from merged configuration.
    ///
    /// # Process
    ///
    /// 1. Validate configuration
    /// 2. Display startup banner
    /// 3. Connect the configured transport and session cache
    /// 4. Build the processor and register the built-in handlers
    /// 5. Build the gateway with its forwarder, relay and session binder
    pub async fn new(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        // Validate configuration
        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        } else {
            info!("✅ Configuration loaded and validated successfully");
        }

        display_banner();

        let transports = connect_transports(&config).await?;

        let processor = Arc::new(
            EventProcessor::new(transports.processor, config.to_processor_config())
                .with_auth_provider(Arc::new(MemoryAuthProvider::new()))
                .with_session_cache(Arc::clone(&transports.sessions)),
        );
        register_system_handlers(&processor)?;

        let gateway = create_gateway_with_config(config.to_gateway_config()?);
        gateway.set_forwarder(EventForwarder::new(
            Arc::clone(&transports.gateway),
            &config.channels.incoming,
        ));
        SessionBinder::new(transports.sessions).register(gateway.router().requests())?;
        let relay = Arc::new(BroadcastRelay::new(gateway.connections()));

        Ok(Self {
            config,
            gateway,
            processor,
            relay,
            gateway_transport: transports.gateway,
        })
    }

    pub fn gateway(&self) -> &Arc<GatewayServer> {
        &self.gateway
    }

    pub fn processor(&self) -> &Arc<EventProcessor> {
        &self.processor
    }

    /// Starts the processor and attaches the relay. The gateway listener is
    /// started separately.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.processor.start().await?;
        self.relay
            .attach(self.gateway_transport.as_ref(), &self.config.channels.outgoing)
            .await?;
        Ok(())
    }

    /// Gateway stop, then processor stop, then the gateway's transport.
    pub async fn shutdown(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.gateway.stop();
        self.processor.stop().await?;
        self.gateway_transport.disconnect().await?;
        Ok(())
    }

    /// Runs until a shutdown signal arrives or the gateway listener fails.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Courier");
        self.log_configuration_summary();

        self.start().await?;

        let mut server_handle = {
            let gateway = Arc::clone(&self.gateway);
            tokio::spawn(async move { gateway.start().await })
        };

        info!("✅ Courier is now running!");
        info!("🔗 Ready to accept connections on {}", self.config.gateway.bind_address);

        let mut failure: Option<Box<dyn std::error::Error>> = None;
        let server_finished = tokio::select! {
            signal = setup_signal_handlers() => {
                signal?;
                false
            }
            joined = &mut server_handle => {
                match joined {
                    Ok(Ok(())) => warn!("⚠️ Gateway stopped before a shutdown signal"),
                    Ok(Err(e)) => {
                        error!("❌ Gateway error: {}", e);
                        failure = Some(e.into());
                    }
                    Err(e) => {
                        error!("❌ Gateway task failed: {}", e);
                        failure = Some(e.into());
                    }
                }
                true
            }
        };

        info!("🛑 Shutting down Courier");
        self.shutdown().await?;

        if !server_finished && tokio::time::timeout(Duration::from_secs(5), server_handle).await.is_err() {
            warn!("⚠️ Gateway did not stop within 5s");
        }

        match failure {
            Some(e) => Err(e),
            None => {
                info!("✅ Courier shutdown complete");
                Ok(())
            }
        }
    }

    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  - Bind address: {}", self.config.gateway.bind_address);
        info!("  - Max connections: {}", self.config.gateway.max_connections);
        info!("  - Transport: {}", self.config.transport.backend);
        info!(
            "  - Channels: {} -> {}",
            self.config.channels.incoming, self.config.channels.outgoing
        );
        info!("  - Log level: {}", self.config.logging.level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_event_system::{EventMessage, Request};
    use courier_gateway::JOIN_ACTION;
    use futures::{SinkExt, StreamExt};
    use serde_json::Value;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn next_json(client: &mut Client) -> Value {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let Message::Text(text) = frame {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = AppConfig::default();
        config.channels.outgoing = config.channels.incoming.clone();

        let result = Application::new(config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_memory_application_wiring() {
        let app = Application::new(AppConfig::default()).await.unwrap();
        assert!(app.processor().has_handler(HEALTH_PING_EVENT));
        assert!(app.gateway().router().requests().has_handler(JOIN_ACTION));

        app.start().await.unwrap();
        assert!(app.processor().is_active());

        app.shutdown().await.unwrap();
        assert!(!app.processor().is_active());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_health_ping_round_trip() {
        let app = Application::new(AppConfig::default()).await.unwrap();
        app.start().await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let gateway = Arc::clone(app.gateway());
        tokio::spawn(async move {
            let _ = gateway.serve(listener).await;
        });

        let (mut client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        assert_eq!(next_json(&mut client).await["eventName"], "connected");

        let join = Request::new(JOIN_ACTION, json!({ "userId": "u1", "roomId": "r1" }));
        client.send(Message::text(join.to_json().to_string())).await.unwrap();
        let joined = next_json(&mut client).await;
        assert_eq!(joined["type"], "response");
        assert_eq!(joined["success"], true);

        let ping = EventMessage::new(HEALTH_PING_EVENT, json!({ "seq": 1 }));
        client.send(Message::text(ping.to_json().to_string())).await.unwrap();
        let pong = next_json(&mut client).await;
        assert_eq!(pong["eventName"], HEALTH_PONG_EVENT);
        assert_eq!(pong["payload"]["echo"]["seq"], 1);

        app.shutdown().await.unwrap();
    }
}
