//! Local listeners for client-originated events.

use super::panic_message;
use crate::connection::ClientConnection;
use async_trait::async_trait;
use courier_event_system::EventMessage;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info};

/// Listener for one client event name.
#[async_trait]
pub trait EventListener: Send + Sync + 'static {
    async fn on_event(&self, event: EventMessage, client: Arc<ClientConnection>) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> EventListener for F
where
    F: Fn(EventMessage, Arc<ClientConnection>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn on_event(&self, event: EventMessage, client: Arc<ClientConnection>) -> anyhow::Result<()> {
        (self)(event, client).await
    }
}

/// Event name → listeners. Any number of listeners per name.
#[derive(Default)]
pub struct EventListenerRegistry {
    listeners: DashMap<String, Vec<Arc<dyn EventListener>>>,
}

impl EventListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, event_name: &str, listener: Arc<dyn EventListener>) {
        self.listeners
            .entry(event_name.to_string())
            .or_default()
            .push(listener);
        info!("📝 Registered event listener for '{}'", event_name);
    }

    /// Drops every listener for `event_name`.
    pub fn unregister_all(&self, event_name: &str) -> bool {
        self.listeners.remove(event_name).is_some()
    }

    pub fn listener_count(&self, event_name: &str) -> usize {
        self.listeners.get(event_name).map_or(0, |entry| entry.len())
    }

    /// Runs every listener for the event concurrently. A failing or
    /// panicking listener is logged and does not affect the others.
    ///
    /// # Returns
    ///
    /// The number of listeners that were invoked.
    pub async fn dispatch(&self, event: &EventMessage, client: &Arc<ClientConnection>) -> usize {
        let listeners = match self.listeners.get(&event.event_name) {
            Some(entry) => entry.value().clone(),
            None => return 0,
        };

        let mut running = listeners
            .iter()
            .map(|listener| {
                let listener = Arc::clone(listener);
                let event = event.clone();
                let client = Arc::clone(client);
                async move {
                    AssertUnwindSafe(listener.on_event(event, client))
                        .catch_unwind()
                        .await
                }
            })
            .collect::<FuturesUnordered<_>>();

        while let Some(outcome) = running.next().await {
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            error!("❌ Error in event:{}: {}", event.event_name, failure);
        }

        listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn failing_listener_does_not_stop_the_others() {
        let registry = EventListenerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        registry.register(
            "chat",
            Arc::new(|_event: EventMessage, _client: Arc<ClientConnection>| async move {
                Err::<(), _>(anyhow::anyhow!("listener failed"))
            }),
        );
        registry.register(
            "chat",
            Arc::new(|event: EventMessage, _client: Arc<ClientConnection>| async move {
                if !event.event_name.is_empty() {
                    panic!("listener panicked");
                }
                Ok::<(), anyhow::Error>(())
            }),
        );
        let seen = calls.clone();
        registry.register(
            "chat",
            Arc::new(move |_event: EventMessage, _client: Arc<ClientConnection>| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), anyhow::Error>(())
                }
            }),
        );

        let (client, _outbound) = ClientConnection::new(None);
        let invoked = registry
            .dispatch(&EventMessage::new("chat", json!({"text": "hi"})), &client)
            .await;

        assert_eq!(invoked, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_event_invokes_nothing() {
        let registry = EventListenerRegistry::new();
        let (client, _outbound) = ClientConnection::new(None);
        assert_eq!(registry.dispatch(&EventMessage::new("none", json!({})), &client).await, 0);
        assert_eq!(registry.listener_count("none"), 0);
    }
}
