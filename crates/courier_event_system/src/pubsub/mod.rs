//! # Pub/Sub Transport
//!
//! Cross-process fan-out over a shared channel medium.
//!
//! Publishing and subscribing are separate roles backed by separate
//! connections: a connection in subscribed mode cannot issue publish
//! commands. Every transport keeps a local channel → handler-set registry
//! that outlives reconnects and drives automatic resubscription.
//!
//! ## Implementations
//!
//! - [`RedisPubSub`] - Redis `PUBLISH`/`SUBSCRIBE`, for multi-process deployments
//! - [`MemoryPubSub`] - in-process broker with the same semantics

pub mod memory;
pub mod redis;
pub mod registry;
pub mod retry;

pub use self::memory::{MemoryBroker, MemoryPubSub};
pub use self::redis::RedisPubSub;
pub use registry::SubscriptionRegistry;
pub use retry::RetryPolicy;

use crate::error::TransportError;
use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// Identity of one handler registration on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

/// Callback invoked for every message on a subscribed channel.
///
/// Closures of the form `Fn(String) -> impl Future<Output =
/// anyhow::Result<()>>` implement this trait automatically.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: String) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: String) -> anyhow::Result<()> {
        (self)(message).await
    }
}

/// Publish/subscribe capability shared by every transport.
#[async_trait]
pub trait PubSub: Send + Sync + 'static {
    /// Adds `handler` to `channel`. Only the first handler on a channel issues
    /// a network-level subscribe.
    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<SubscriptionId, TransportError>;

    /// Removes one handler, or every handler when `subscription` is `None`.
    /// The network-level unsubscribe happens once the channel has no handlers.
    async fn unsubscribe(
        &self,
        channel: &str,
        subscription: Option<SubscriptionId>,
    ) -> Result<(), TransportError>;

    async fn publish(&self, channel: &str, message: String) -> Result<(), TransportError>;

    /// Stops the subscriber loop and releases both connections.
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// JSON helpers available on every [`PubSub`].
#[async_trait]
pub trait PubSubExt {
    async fn publish_json<T>(&self, channel: &str, value: &T) -> Result<(), TransportError>
    where
        T: Serialize + Sync + ?Sized;
}

#[async_trait]
impl<P: PubSub + ?Sized> PubSubExt for P {
    async fn publish_json<T>(&self, channel: &str, value: &T) -> Result<(), TransportError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let message = serde_json::to_string(value)?;
        self.publish(channel, message).await
    }
}
