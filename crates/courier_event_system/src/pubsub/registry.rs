//! Local channel → handler-set state shared by the transports.

use super::{MessageHandler, SubscriptionId};
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

type Handlers = Vec<(SubscriptionId, Arc<dyn MessageHandler>)>;

/// Per-channel handler sets.
///
/// The registry is the source of truth for resubscription after a reconnect;
/// transports never clear it on connection loss.
#[derive(Default)]
pub struct SubscriptionRegistry {
    channels: DashMap<String, Handlers>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` and reports whether it is the first on `channel`.
    pub fn add(&self, channel: &str, handler: Arc<dyn MessageHandler>) -> (SubscriptionId, bool) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut entry = self.channels.entry(channel.to_string()).or_default();
        let first = entry.is_empty();
        entry.push((id, handler));
        (id, first)
    }

    /// Removes one handler, or all of them when `id` is `None`.
    ///
    /// Returns `true` when the channel lost its last handler and the
    /// network-level subscription should be dropped.
    pub fn remove(&self, channel: &str, id: Option<SubscriptionId>) -> bool {
        let Some(id) = id else {
            return self.channels.remove(channel).is_some();
        };

        let emptied = match self.channels.get_mut(channel) {
            Some(mut entry) => {
                let before = entry.len();
                entry.retain(|(sid, _)| *sid != id);
                entry.len() != before && entry.is_empty()
            }
            None => false,
        };

        if emptied {
            self.channels.remove_if(channel, |_, handlers| handlers.is_empty());
        }
        emptied
    }

    pub fn channels(&self) -> Vec<String> {
        self.channels.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn handler_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, |entry| entry.len())
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.handler_count(channel) > 0
    }

    /// Delivers `message` to every handler on `channel` and waits for all of
    /// them to finish.
    ///
    /// Handlers run concurrently. An error or panic in one is logged and does
    /// not affect the others. Receive loops await this before taking the next
    /// message, which keeps each publisher's stream in order. Returns `false`
    /// when the channel has no handlers.
    pub async fn dispatch(&self, channel: &str, message: String) -> bool {
        let handlers: Vec<_> = match self.channels.get(channel) {
            Some(entry) => entry
                .iter()
                .map(|(id, handler)| (*id, Arc::clone(handler)))
                .collect(),
            None => return false,
        };

        if handlers.is_empty() {
            return false;
        }

        let mut futures = handlers
            .into_iter()
            .map(|(id, handler)| {
                let message = message.clone();
                async move {
                    let outcome = AssertUnwindSafe(handler.handle(message))
                        .catch_unwind()
                        .await;
                    (id, outcome)
                }
            })
            .collect::<FuturesUnordered<_>>();

        while let Some((id, outcome)) = futures.next().await {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("❌ Subscriber {:?} on '{}' failed: {}", id, channel, e);
                }
                Err(_) => {
                    error!("❌ Subscriber {:?} on '{}' panicked", id, channel);
                }
            }
        }
        debug!("📨 Delivered message on '{}'", channel);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn noop() -> Arc<dyn MessageHandler> {
        Arc::new(|_msg: String| async { Ok::<(), anyhow::Error>(()) })
    }

    #[test]
    fn first_registration_is_reported_once() {
        let registry = SubscriptionRegistry::new();
        let (a, first_a) = registry.add("c", noop());
        let (b, first_b) = registry.add("c", noop());
        assert!(first_a);
        assert!(!first_b);
        assert_ne!(a, b);
        assert_eq!(registry.handler_count("c"), 2);
    }

    #[test]
    fn removing_last_handler_empties_channel() {
        let registry = SubscriptionRegistry::new();
        let (a, _) = registry.add("c", noop());
        let (b, _) = registry.add("c", noop());

        assert!(!registry.remove("c", Some(a)));
        assert!(!registry.remove("c", Some(a)), "second removal is a no-op");
        assert!(registry.remove("c", Some(b)));
        assert!(registry.channels().is_empty());
    }

    #[test]
    fn remove_all_drops_channel() {
        let registry = SubscriptionRegistry::new();
        registry.add("c", noop());
        registry.add("c", noop());
        assert!(registry.remove("c", None));
        assert!(!registry.remove("c", None));
        assert_eq!(registry.handler_count("c"), 0);
    }

    #[tokio::test]
    async fn failing_handlers_do_not_block_siblings() {
        let registry = SubscriptionRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        registry.add(
            "c",
            Arc::new(|_msg: String| async { Err::<(), _>(anyhow::anyhow!("boom")) }),
        );
        registry.add(
            "c",
            Arc::new(|msg: String| async move {
                if !msg.is_empty() {
                    panic!("handler panic");
                }
                Ok::<(), anyhow::Error>(())
            }),
        );
        let counter = Arc::clone(&hits);
        registry.add(
            "c",
            Arc::new(move |_msg: String| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), anyhow::Error>(())
                }
            }),
        );

        assert!(registry.dispatch("c", "one".into()).await);
        assert!(registry.dispatch("c", "two".into()).await);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(!registry.dispatch("other", "x".into()).await);
    }
}
