//! In-process transport.
//!
//! A [`MemoryBroker`] plays the shared channel medium. Every
//! [`MemoryPubSub`] attached to the same broker sees the others' publishes,
//! which makes several gateways and processors in one process (or one test)
//! behave like separate processes sharing Redis.

use super::{MessageHandler, PubSub, SubscriptionId, SubscriptionRegistry};
use crate::error::TransportError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const BROKER_CAPACITY: usize = 1024;

struct BrokerInner {
    sender: broadcast::Sender<(String, String)>,
    subscriptions: DashMap<String, usize>,
}

/// Shared medium connecting [`MemoryPubSub`] instances.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROKER_CAPACITY);
        Self {
            inner: Arc::new(BrokerInner {
                sender,
                subscriptions: DashMap::new(),
            }),
        }
    }

    /// Number of transports holding a network-level subscription to `channel`.
    pub fn network_subscriptions(&self, channel: &str) -> usize {
        self.inner.subscriptions.get(channel).map_or(0, |count| *count)
    }

    /// Opens a new transport on this broker.
    pub fn connect(&self) -> MemoryPubSub {
        MemoryPubSub::new(self.clone())
    }

    fn network_subscribe(&self, channel: &str) {
        *self.inner.subscriptions.entry(channel.to_string()).or_insert(0) += 1;
    }

    fn network_unsubscribe(&self, channel: &str) {
        if let Some(mut count) = self.inner.subscriptions.get_mut(channel) {
            *count = count.saturating_sub(1);
        }
        self.inner.subscriptions.remove_if(channel, |_, count| *count == 0);
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport attached to a [`MemoryBroker`].
pub struct MemoryPubSub {
    broker: MemoryBroker,
    registry: Arc<SubscriptionRegistry>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<Notify>,
    ops: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl MemoryPubSub {
    pub fn new(broker: MemoryBroker) -> Self {
        Self {
            broker,
            registry: Arc::new(SubscriptionRegistry::new()),
            receiver: Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
            ops: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Standalone transport on a private broker.
    pub fn standalone() -> Self {
        Self::new(MemoryBroker::new())
    }

    pub fn broker(&self) -> &MemoryBroker {
        &self.broker
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    /// Starts the receive loop on first use. The broker receiver is created
    /// before returning so no message published afterwards is missed.
    fn ensure_receiver(&self) {
        let Ok(mut slot) = self.receiver.lock() else {
            return;
        };
        if slot.is_some() {
            return;
        }

        let mut rx = self.broker.inner.sender.subscribe();
        let registry = Arc::clone(&self.registry);
        let shutdown = Arc::clone(&self.shutdown);
        *slot = Some(tokio::spawn(async move {
            loop {
                // A message being dispatched is finished before shutdown is seen.
                let received = tokio::select! {
                    biased;
                    _ = shutdown.notified() => break,
                    received = rx.recv() => received,
                };
                match received {
                    Ok((channel, message)) => {
                        registry.dispatch(&channel, message).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("⚠️ Memory transport lagged, {} messages skipped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionId, TransportError> {
        self.ensure_open()?;
        let _guard = self.ops.lock().await;

        self.ensure_receiver();
        let (id, first) = self.registry.add(channel, handler);
        if first {
            self.broker.network_subscribe(channel);
            debug!("📡 Subscribed to '{}'", channel);
        }
        Ok(id)
    }

    async fn unsubscribe(
        &self,
        channel: &str,
        subscription: Option<SubscriptionId>,
    ) -> Result<(), TransportError> {
        let _guard = self.ops.lock().await;

        if self.registry.remove(channel, subscription) {
            self.broker.network_unsubscribe(channel);
            debug!("📡 Unsubscribed from '{}'", channel);
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, message: String) -> Result<(), TransportError> {
        self.ensure_open()?;
        // Publishing with nobody listening is not an error, as with Redis.
        let _ = self.broker.inner.sender.send((channel.to_string(), message));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // Detached rather than awaited: disconnect may run inside a handler.
        drop(self.receiver.lock().ok().and_then(|mut slot| slot.take()));
        self.shutdown.notify_one();
        for channel in self.registry.channels() {
            self.broker.network_unsubscribe(&channel);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::PubSubExt;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn forwarding(tx: mpsc::UnboundedSender<String>) -> Arc<dyn MessageHandler> {
        Arc::new(move |msg: String| {
            let tx = tx.clone();
            async move {
                tx.send(msg)?;
                Ok::<(), anyhow::Error>(())
            }
        })
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<String>) -> Option<String> {
        timeout(Duration::from_secs(1), rx.recv()).await.ok().flatten()
    }

    #[tokio::test]
    async fn every_local_handler_receives_each_message() {
        let transport = MemoryPubSub::standalone();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();

        transport.subscribe("room", forwarding(tx_a)).await.unwrap();
        transport.subscribe("room", forwarding(tx_b)).await.unwrap();
        assert_eq!(transport.broker().network_subscriptions("room"), 1);

        transport.publish("room", "hello".into()).await.unwrap();
        assert_eq!(recv(&mut rx_a).await.as_deref(), Some("hello"));
        assert_eq!(recv(&mut rx_b).await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn messages_cross_between_transports_on_one_broker() {
        let broker = MemoryBroker::new();
        let publisher = broker.connect();
        let subscriber = broker.connect();
        let (tx, mut rx) = mpsc::unbounded_channel();

        subscriber.subscribe("events", forwarding(tx)).await.unwrap();
        publisher.publish("other", "skip".into()).await.unwrap();
        publisher
            .publish_json("events", &serde_json::json!({"n": 1}))
            .await
            .unwrap();

        assert_eq!(recv(&mut rx).await.as_deref(), Some(r#"{"n":1}"#));
    }

    #[tokio::test]
    async fn network_unsubscribe_waits_for_last_handler() {
        let transport = MemoryPubSub::standalone();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let keep = transport.subscribe("c", forwarding(tx.clone())).await.unwrap();
        let drop_me = transport.subscribe("c", forwarding(tx)).await.unwrap();

        transport.unsubscribe("c", Some(drop_me)).await.unwrap();
        assert_eq!(transport.broker().network_subscriptions("c"), 1);

        transport.publish("c", "once".into()).await.unwrap();
        assert_eq!(recv(&mut rx).await.as_deref(), Some("once"));
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());

        transport.unsubscribe("c", Some(keep)).await.unwrap();
        assert_eq!(transport.broker().network_subscriptions("c"), 0);
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_delivery() {
        let transport = MemoryPubSub::standalone();
        let (tx, mut rx) = mpsc::unbounded_channel();

        transport
            .subscribe(
                "c",
                Arc::new(|_msg: String| async { Err::<(), _>(anyhow::anyhow!("boom")) }),
            )
            .await
            .unwrap();
        transport.subscribe("c", forwarding(tx)).await.unwrap();

        transport.publish("c", "first".into()).await.unwrap();
        transport.publish("c", "second".into()).await.unwrap();

        let mut received = vec![recv(&mut rx).await.unwrap(), recv(&mut rx).await.unwrap()];
        received.sort();
        assert_eq!(received, vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn single_publisher_order_is_preserved() {
        let broker = MemoryBroker::new();
        let publisher = broker.connect();
        let subscriber = broker.connect();
        let (tx, mut rx) = mpsc::unbounded_channel();

        subscriber
            .subscribe(
                "ordered",
                Arc::new(move |msg: String| {
                    let tx = tx.clone();
                    async move {
                        tokio::task::yield_now().await;
                        tx.send(msg.parse::<u32>()?)?;
                        Ok::<(), anyhow::Error>(())
                    }
                }),
            )
            .await
            .unwrap();

        for n in 0..500u32 {
            publisher.publish("ordered", n.to_string()).await.unwrap();
        }

        let mut received = Vec::with_capacity(500);
        while received.len() < 500 {
            let next = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
            received.push(next);
        }
        assert_eq!(received, (0..500).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn publish_after_disconnect_fails() {
        let transport = MemoryPubSub::standalone();
        let (tx, _rx) = mpsc::unbounded_channel();
        transport.subscribe("c", forwarding(tx)).await.unwrap();

        transport.disconnect().await.unwrap();
        assert_eq!(transport.broker().network_subscriptions("c"), 0);
        assert!(matches!(
            transport.publish("c", "late".into()).await,
            Err(TransportError::Closed)
        ));
        transport.disconnect().await.unwrap();
    }
}
