/// Broadcast and permission methods
use super::core::EventProcessor;
use crate::error::EventError;
use crate::events::BroadcastEvent;
use crate::pubsub::PubSubExt;
use serde_json::Value;
use tracing::{debug, error, warn};

impl EventProcessor {
    /// Publishes `event` on the outbound channel.
    ///
    /// This is the only way results leave the processor. Transport errors are
    /// returned to the caller.
    pub async fn broadcast(&self, event: BroadcastEvent) -> Result<(), EventError> {
        self.pubsub
            .publish_json(&self.config.outgoing_channel, &event)
            .await?;
        debug!(
            "📢 Broadcast '{}' to {} recipients",
            event.event_type,
            event.recipients.len()
        );
        Ok(())
    }

    /// Broadcasts to every live connection of the room's authorized users.
    ///
    /// Users without a live mapping and connections listed in
    /// `exclude_socket_ids` are dropped. Recipients keep the auth provider's
    /// user order.
    ///
    /// # Errors
    ///
    /// Fails when a provider is missing, the auth provider errors, or the
    /// broadcast cannot be published.
    pub async fn broadcast_to_room(
        &self,
        room_id: &str,
        event_type: &str,
        payload: Value,
        exclude_socket_ids: Option<Vec<String>>,
    ) -> Result<(), EventError> {
        let result = self
            .resolve_room_broadcast(room_id, event_type, payload, exclude_socket_ids)
            .await;
        match result {
            Ok(event) => self.broadcast(event).await,
            Err(e) => {
                error!("❌ Failed to broadcast to room {}: {}", room_id, e);
                Err(e)
            }
        }
    }

    async fn resolve_room_broadcast(
        &self,
        room_id: &str,
        event_type: &str,
        payload: Value,
        exclude_socket_ids: Option<Vec<String>>,
    ) -> Result<BroadcastEvent, EventError> {
        let auth = self
            .auth_provider()
            .await
            .ok_or(EventError::AuthProviderNotConfigured)?;
        let cache = self
            .session_cache()
            .await
            .ok_or(EventError::SessionCacheNotConfigured)?;

        let users = auth.get_authorized_users_in_room(room_id).await?;
        let sockets = cache.get_socket_ids(&users, room_id).await;
        let excluded = exclude_socket_ids.as_deref().unwrap_or_default();

        let recipients: Vec<String> = users
            .iter()
            .filter_map(|user_id| sockets.get(user_id).cloned().flatten())
            .filter(|socket_id| !excluded.contains(socket_id))
            .collect();

        let mut event = BroadcastEvent::new(event_type, recipients, payload);
        if let Some(excluded) = exclude_socket_ids {
            event = event.with_exclusions(excluded);
        }
        Ok(event)
    }

    /// Broadcasts to one user's connection in `room_id`.
    ///
    /// A user with no live connection is logged and skipped; that is not an
    /// error.
    pub async fn broadcast_to_user(
        &self,
        user_id: &str,
        room_id: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<(), EventError> {
        let cache = self
            .session_cache()
            .await
            .ok_or(EventError::SessionCacheNotConfigured)?;

        match cache.get_socket_id(user_id, room_id).await {
            Some(socket_id) => {
                self.broadcast(BroadcastEvent::new(event_type, vec![socket_id], payload))
                    .await
            }
            None => {
                warn!("⚠️ No live connection for user {} in room {}", user_id, room_id);
                Ok(())
            }
        }
    }

    /// Fail-closed permission check: a missing provider or a provider error
    /// yields `false`.
    pub async fn check_permission(&self, user_id: &str, room_id: &str, action: &str) -> bool {
        let Some(auth) = self.auth_provider().await else {
            error!("❌ Permission check without an auth provider");
            return false;
        };

        match auth.check_permission(user_id, room_id, action).await {
            Ok(allowed) => allowed,
            Err(e) => {
                error!(
                    "❌ Permission check failed for {} on {}:{}: {}",
                    user_id, room_id, action, e
                );
                false
            }
        }
    }
}
