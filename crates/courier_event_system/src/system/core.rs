/// Core EventProcessor implementation
use crate::error::EventError;
use crate::events::EventHandler;
use crate::providers::{AuthProvider, SessionCache};
use crate::pubsub::{MessageHandler, PubSub, SubscriptionId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// Channel names the processor consumes from and publishes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Channel carrying inbound [`GatewayEvent`](crate::GatewayEvent)s.
    pub incoming_channel: String,
    /// Channel receiving [`BroadcastEvent`](crate::BroadcastEvent)s.
    pub outgoing_channel: String,
}

impl ProcessorConfig {
    pub fn new(incoming_channel: impl Into<String>, outgoing_channel: impl Into<String>) -> Self {
        Self {
            incoming_channel: incoming_channel.into(),
            outgoing_channel: outgoing_channel.into(),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::new("events:inbound", "events:broadcast")
    }
}

enum ProcessorState {
    Stopped,
    Running { subscription: SubscriptionId },
}

/// Central router between the inbound and outbound channels.
///
/// Consumes [`GatewayEvent`](crate::GatewayEvent)s, runs the handler
/// registered for each literal event type, and publishes the resulting
/// broadcasts. Instances are explicit values; share one behind an `Arc`.
///
/// Handler results only leave through [`broadcast`](EventProcessor::broadcast);
/// the processor never talks to connections.
pub struct EventProcessor {
    pub(super) config: ProcessorConfig,
    pub(super) pubsub: Arc<dyn PubSub>,
    /// One handler per literal event type.
    pub(super) handlers: DashMap<String, Arc<dyn EventHandler>>,
    pub(super) auth_provider: RwLock<Option<Arc<dyn AuthProvider>>>,
    pub(super) session_cache: RwLock<Option<Arc<dyn SessionCache>>>,
    state: Mutex<ProcessorState>,
    active: AtomicBool,
}

impl std::fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessor")
            .field("config", &self.config)
            .field("handlers", &self.handlers.len())
            .field("active", &self.is_active())
            .finish()
    }
}

impl EventProcessor {
    /// Creates a stopped processor with no handlers or providers.
    pub fn new(pubsub: Arc<dyn PubSub>, config: ProcessorConfig) -> Self {
        Self {
            config,
            pubsub,
            handlers: DashMap::new(),
            auth_provider: RwLock::new(None),
            session_cache: RwLock::new(None),
            state: Mutex::new(ProcessorState::Stopped),
            active: AtomicBool::new(false),
        }
    }

    pub fn with_auth_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth_provider = RwLock::new(Some(provider));
        self
    }

    pub fn with_session_cache(mut self, cache: Arc<dyn SessionCache>) -> Self {
        self.session_cache = RwLock::new(Some(cache));
        self
    }

    pub async fn set_auth_provider(&self, provider: Arc<dyn AuthProvider>) {
        *self.auth_provider.write().await = Some(provider);
    }

    pub async fn set_session_cache(&self, cache: Arc<dyn SessionCache>) {
        *self.session_cache.write().await = Some(cache);
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(super) async fn auth_provider(&self) -> Option<Arc<dyn AuthProvider>> {
        self.auth_provider.read().await.clone()
    }

    pub(super) async fn session_cache(&self) -> Option<Arc<dyn SessionCache>> {
        self.session_cache.read().await.clone()
    }

    /// Subscribes to the inbound channel.
    ///
    /// Fails without changing state when no auth provider is configured.
    /// Calling it while running is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<(), EventError> {
        let mut state = self.state.lock().await;
        if matches!(*state, ProcessorState::Running { .. }) {
            debug!("Event processor already running");
            return Ok(());
        }

        if self.auth_provider.read().await.is_none() {
            return Err(EventError::AuthProviderNotConfigured);
        }

        // Weak so the transport's registry does not keep the processor alive.
        let processor = Arc::downgrade(self);
        let handler: Arc<dyn MessageHandler> = Arc::new(move |message: String| {
            let processor = processor.clone();
            async move {
                if let Some(processor) = processor.upgrade() {
                    processor.process_message(&message).await;
                }
                Ok::<(), anyhow::Error>(())
            }
        });

        let subscription = self
            .pubsub
            .subscribe(&self.config.incoming_channel, handler)
            .await?;
        *state = ProcessorState::Running { subscription };
        self.active.store(true, Ordering::Release);

        info!(
            "🚀 Event processor started: '{}' → '{}' ({} handlers)",
            self.config.incoming_channel,
            self.config.outgoing_channel,
            self.handlers.len()
        );
        Ok(())
    }

    /// Unsubscribes, disconnects the transport and returns to stopped.
    ///
    /// In-flight handler invocations are left to finish on their own.
    pub async fn stop(&self) -> Result<(), EventError> {
        let mut state = self.state.lock().await;
        let ProcessorState::Running { subscription } =
            std::mem::replace(&mut *state, ProcessorState::Stopped)
        else {
            debug!("Event processor already stopped");
            return Ok(());
        };
        self.active.store(false, Ordering::Release);

        self.pubsub
            .unsubscribe(&self.config.incoming_channel, Some(subscription))
            .await?;
        self.pubsub.disconnect().await?;

        info!("🛑 Event processor stopped");
        Ok(())
    }
}
