//! Redis-backed transport.
//!
//! Publishing goes through a [`ConnectionManager`], which reconnects on its
//! own. Subscribing is owned by a background task holding a dedicated
//! [`redis::aio::PubSub`] connection; subscribe and unsubscribe requests reach
//! it over a command channel. When that connection drops the task reconnects
//! with [`RetryPolicy`] backoff and resubscribes every channel in the
//! registry.

use super::{MessageHandler, PubSub, RetryPolicy, SubscriptionId, SubscriptionRegistry};
use crate::error::TransportError;
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type Ack = oneshot::Sender<Result<(), TransportError>>;

enum Command {
    Subscribe { channel: String, ack: Ack },
    Unsubscribe { channel: String, ack: Ack },
    Shutdown,
}

enum Exit {
    Shutdown,
    Disconnected,
}

fn is_connection_error(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal()
}

pub struct RedisPubSub {
    client: redis::Client,
    publisher: OnceCell<ConnectionManager>,
    registry: Arc<SubscriptionRegistry>,
    commands: mpsc::UnboundedSender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
    // Serializes registry mutation with the matching network command.
    ops: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl RedisPubSub {
    /// Opens the publisher connection and starts the subscriber task.
    ///
    /// Fails if the publisher cannot reach Redis. The subscriber connects in
    /// the background and keeps retrying.
    pub async fn connect(url: &str, retry: RetryPolicy) -> Result<Self, TransportError> {
        let transport = Self::open(url, retry)?;
        transport.publisher().await?;
        info!("🔌 Redis transport connected to {}", url);
        Ok(transport)
    }

    /// Starts the subscriber task without touching the network. The
    /// publisher connects on first publish.
    pub fn open(url: &str, retry: RetryPolicy) -> Result<Self, TransportError> {
        let client = redis::Client::open(url)?;
        let registry = Arc::new(SubscriptionRegistry::new());
        let (commands, receiver) = mpsc::unbounded_channel();

        let worker = tokio::spawn(run_subscriber(
            client.clone(),
            Arc::clone(&registry),
            receiver,
            retry,
        ));

        Ok(Self {
            client,
            publisher: OnceCell::new(),
            registry,
            commands,
            worker: Mutex::new(Some(worker)),
            ops: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    async fn publisher(&self) -> Result<ConnectionManager, TransportError> {
        let manager = self
            .publisher
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(manager.clone())
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    async fn request(&self, build: impl FnOnce(Ack) -> Command) -> Result<(), TransportError> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(build(ack))
            .map_err(|_| TransportError::Closed)?;
        done.await.map_err(|_| TransportError::Closed)?
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PubSub for RedisPubSub {
    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionId, TransportError> {
        self.ensure_open()?;
        let _guard = self.ops.lock().await;

        let (id, first) = self.registry.add(channel, handler);
        if first {
            let result = self
                .request(|ack| Command::Subscribe {
                    channel: channel.to_string(),
                    ack,
                })
                .await;
            if let Err(e) = result {
                self.registry.remove(channel, Some(id));
                return Err(e);
            }
        }
        Ok(id)
    }

    async fn unsubscribe(
        &self,
        channel: &str,
        subscription: Option<SubscriptionId>,
    ) -> Result<(), TransportError> {
        let _guard = self.ops.lock().await;

        if self.registry.remove(channel, subscription) && !self.closed.load(Ordering::Acquire) {
            self.request(|ack| Command::Unsubscribe {
                channel: channel.to_string(),
                ack,
            })
            .await?;
        }
        Ok(())
    }

    async fn publish(&self, channel: &str, message: String) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut conn = self.publisher().await?;
        let receivers: i64 = conn.publish(channel, message).await?;
        debug!("📤 Published on '{}' to {} subscribers", channel, receivers);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let _ = self.commands.send(Command::Shutdown);
        let worker = self.worker.lock().ok().and_then(|mut slot| slot.take());
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("❌ Redis subscriber task ended abnormally: {}", e);
            }
        }

        info!("🔌 Redis transport disconnected");
        Ok(())
    }
}

async fn run_subscriber(
    client: redis::Client,
    registry: Arc<SubscriptionRegistry>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    retry: RetryPolicy,
) {
    let mut attempt: u32 = 0;

    loop {
        if attempt > 0 {
            let delay = retry.delay(attempt);
            debug!("⏳ Redis subscriber retrying in {:?} (attempt {})", delay, attempt);
            if !wait_disconnected(&mut commands, delay).await {
                return;
            }
        }

        let mut pubsub = match client.get_async_pubsub().await {
            Ok(pubsub) => pubsub,
            Err(e) => {
                attempt = attempt.saturating_add(1);
                warn!("⚠️ Redis subscriber connection failed: {}", e);
                continue;
            }
        };

        let mut resubscribed = true;
        for channel in registry.channels() {
            if let Err(e) = pubsub.subscribe(&channel).await {
                warn!("⚠️ Failed to resubscribe to '{}': {}", channel, e);
                resubscribed = false;
                break;
            }
        }
        if !resubscribed {
            attempt = attempt.saturating_add(1);
            continue;
        }

        if attempt > 0 {
            info!("✅ Redis subscriber reconnected after {} attempts", attempt);
        }
        attempt = 0;

        match serve(&mut pubsub, &registry, &mut commands).await {
            Exit::Shutdown => return,
            Exit::Disconnected => {
                warn!("🔄 Redis subscriber connection lost, reconnecting");
                attempt = 1;
            }
        }
    }
}

/// Sleeps for `delay` while acknowledging commands. Registry changes made
/// meanwhile are applied on the next successful connection.
///
/// Returns `false` on shutdown.
async fn wait_disconnected(commands: &mut mpsc::UnboundedReceiver<Command>, delay: std::time::Duration) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            command = commands.recv() => match command {
                Some(Command::Subscribe { ack, .. }) | Some(Command::Unsubscribe { ack, .. }) => {
                    let _ = ack.send(Ok(()));
                }
                Some(Command::Shutdown) | None => return false,
            },
        }
    }
}

async fn serve(
    pubsub: &mut redis::aio::PubSub,
    registry: &SubscriptionRegistry,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> Exit {
    enum Next {
        Command(Option<Command>),
        Message(Option<redis::Msg>),
    }

    loop {
        let next = {
            let mut messages = std::pin::pin!(pubsub.on_message());
            tokio::select! {
                biased;
                command = commands.recv() => Next::Command(command),
                message = messages.next() => Next::Message(message),
            }
        };

        match next {
            Next::Command(Some(Command::Subscribe { channel, ack })) => {
                let result = pubsub.subscribe(&channel).await;
                if let Some(exit) = acknowledge(ack, result, &channel) {
                    return exit;
                }
            }
            Next::Command(Some(Command::Unsubscribe { channel, ack })) => {
                let result = pubsub.unsubscribe(&channel).await;
                if let Some(exit) = acknowledge(ack, result, &channel) {
                    return exit;
                }
            }
            Next::Command(Some(Command::Shutdown)) | Next::Command(None) => return Exit::Shutdown,
            Next::Message(Some(msg)) => {
                let channel = msg.get_channel_name().to_string();
                match msg.get_payload::<String>() {
                    Ok(payload) => {
                        registry.dispatch(&channel, payload).await;
                    }
                    Err(e) => warn!("⚠️ Dropping undecodable message on '{}': {}", channel, e),
                }
            }
            Next::Message(None) => return Exit::Disconnected,
        }
    }
}

/// Reports a command result to its caller.
///
/// A connection failure is acknowledged as success: the registry already
/// holds the change and the reconnect path applies it.
fn acknowledge(ack: Ack, result: Result<(), RedisError>, channel: &str) -> Option<Exit> {
    match result {
        Ok(()) => {
            let _ = ack.send(Ok(()));
            None
        }
        Err(e) if is_connection_error(&e) => {
            warn!("⚠️ Connection lost while updating '{}': {}", channel, e);
            let _ = ack.send(Ok(()));
            Some(Exit::Disconnected)
        }
        Err(e) => {
            let _ = ack.send(Err(e.into()));
            None
        }
    }
}
