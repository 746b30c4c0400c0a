//! Binding connections to (user, room) sessions.
//!
//! Clients announce who they are with a `session:join` request carrying
//! `{userId, roomId}`. The binder records the connection as the user's
//! current connection for that room in the [`SessionCache`], stores the
//! binding on the connection and joins the local room. `session:leave` and
//! connection close undo it.

use crate::connection::{ClientConnection, ROOM_ID_KEY, USER_ID_KEY};
use crate::error::GatewayError;
use crate::messaging::RequestRegistry;
use anyhow::anyhow;
use courier_event_system::{Request, Response, SessionCache, Value};
use dashmap::DashSet;
use serde_json::json;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

pub const JOIN_ACTION: &str = "session:join";
pub const LEAVE_ACTION: &str = "session:leave";

pub struct SessionBinder {
    cache: Arc<dyn SessionCache>,
    /// Connections with a close hook installed.
    tracked: DashSet<String>,
}

fn required_str<'a>(payload: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("{} is required", key))
}

impl SessionBinder {
    pub fn new(cache: Arc<dyn SessionCache>) -> Arc<Self> {
        Arc::new(Self {
            cache,
            tracked: DashSet::new(),
        })
    }

    /// Registers the join and leave actions on `requests`.
    pub fn register(self: &Arc<Self>, requests: &RequestRegistry) -> Result<(), GatewayError> {
        let binder = Arc::clone(self);
        requests.register(
            JOIN_ACTION,
            Arc::new(move |request: Request, client: Arc<ClientConnection>| {
                let binder = Arc::clone(&binder);
                async move { binder.join(request, client).await }
            }),
        )?;

        let binder = Arc::clone(self);
        requests.register(
            LEAVE_ACTION,
            Arc::new(move |request: Request, client: Arc<ClientConnection>| {
                let binder = Arc::clone(&binder);
                async move { binder.leave(request, client).await }
            }),
        )
    }

    /// Binds `client` to the `{userId, roomId}` in the request payload,
    /// replacing any previous binding of this connection.
    pub async fn join(self: &Arc<Self>, request: Request, client: Arc<ClientConnection>) -> anyhow::Result<Response> {
        let user_id = required_str(&request.payload, USER_ID_KEY)?;
        let room_id = required_str(&request.payload, ROOM_ID_KEY)?;
        let socket_id = client.id();

        if let Some((old_user, old_room)) = Self::binding(&client) {
            if old_user != user_id || old_room != room_id {
                self.release(&old_user, &old_room, &socket_id).await;
                client.leave_room(&old_room);
            }
        }

        self.cache.set_socket_mapping(user_id, room_id, &socket_id).await?;
        client.set_metadata(USER_ID_KEY, json!(user_id));
        client.set_metadata(ROOM_ID_KEY, json!(room_id));
        client.join_room(room_id);
        self.track(&client);

        info!("🔗 Client {} joined room '{}' as user '{}'", socket_id, room_id, user_id);
        Ok(Response::success(
            request.id,
            json!({ "userId": user_id, "roomId": room_id, "socketId": socket_id }),
        ))
    }

    /// Clears the connection's binding, if any.
    pub async fn leave(self: &Arc<Self>, request: Request, client: Arc<ClientConnection>) -> anyhow::Result<Response> {
        let Some((user_id, room_id)) = Self::binding(&client) else {
            return Ok(Response::success(request.id, json!({ "left": false })));
        };

        self.release(&user_id, &room_id, &client.id()).await;
        client.remove_metadata(USER_ID_KEY);
        client.remove_metadata(ROOM_ID_KEY);
        client.leave_room(&room_id);

        info!("🔌 Client {} left room '{}'", client.id(), room_id);
        Ok(Response::success(
            request.id,
            json!({ "left": true, "userId": user_id, "roomId": room_id }),
        ))
    }

    fn binding(client: &ClientConnection) -> Option<(String, String)> {
        Some((client.metadata_str(USER_ID_KEY)?, client.metadata_str(ROOM_ID_KEY)?))
    }

    /// Removes the mapping unless the user has since bound another
    /// connection to the room. The check and the delete are one cache step.
    async fn release(&self, user_id: &str, room_id: &str, socket_id: &str) {
        match self.cache.remove_socket_mapping_if(user_id, room_id, socket_id).await {
            Ok(true) => {}
            Ok(false) => debug!("Mapping for {}:{} no longer points at {}", user_id, room_id, socket_id),
            Err(e) => warn!("⚠️ Failed to remove mapping for {}:{}: {}", user_id, room_id, e),
        }
    }

    fn track(self: &Arc<Self>, client: &ClientConnection) {
        if !self.tracked.insert(client.id()) {
            return;
        }

        let binder: Weak<Self> = Arc::downgrade(self);
        client.on_disconnect(move |client, _reason| {
            let Some(binder) = binder.upgrade() else {
                return;
            };
            let socket_id = client.id();
            binder.tracked.remove(&socket_id);
            let Some((user_id, room_id)) = Self::binding(client) else {
                return;
            };
            tokio::spawn(async move {
                binder.release(&user_id, &room_id, &socket_id).await;
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_event_system::{MemorySessionCache, ProviderError};
    use std::time::Duration;

    fn join_request(user: &str, room: &str) -> Request {
        Request::new(JOIN_ACTION, json!({ "userId": user, "roomId": room }))
    }

    async fn eventually_unmapped(cache: &MemorySessionCache, user: &str, room: &str) {
        for _ in 0..50 {
            if cache.get_socket_id(user, room).await.is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("mapping for {}:{} was never removed", user, room);
    }

    #[tokio::test]
    async fn join_binds_connection() {
        let cache = Arc::new(MemorySessionCache::new());
        let binder = SessionBinder::new(cache.clone());
        let (client, _outbound) = ClientConnection::new(None);

        let response = binder.join(join_request("u1", "r1"), client.clone()).await.unwrap();
        assert!(response.success);
        assert_eq!(response.payload["socketId"], client.id());
        assert_eq!(cache.get_socket_id("u1", "r1").await, Some(client.id()));
        assert_eq!(client.metadata_str(USER_ID_KEY).as_deref(), Some("u1"));
        assert!(client.in_room("r1"));
    }

    #[tokio::test]
    async fn join_requires_user_and_room() {
        let binder = SessionBinder::new(Arc::new(MemorySessionCache::new()));
        let (client, _outbound) = ClientConnection::new(None);

        let missing_room = Request::new(JOIN_ACTION, json!({ "userId": "u1" }));
        let err = binder.join(missing_room, client.clone()).await.unwrap_err();
        assert_eq!(err.to_string(), "roomId is required");
        assert!(client.metadata_str(USER_ID_KEY).is_none());
    }

    #[tokio::test]
    async fn rejoin_moves_the_binding() {
        let cache = Arc::new(MemorySessionCache::new());
        let binder = SessionBinder::new(cache.clone());
        let (client, _outbound) = ClientConnection::new(None);

        binder.join(join_request("u1", "r1"), client.clone()).await.unwrap();
        binder.join(join_request("u1", "r2"), client.clone()).await.unwrap();

        assert_eq!(cache.get_socket_id("u1", "r1").await, None);
        assert_eq!(cache.get_socket_id("u1", "r2").await, Some(client.id()));
        assert_eq!(client.rooms(), vec!["r2".to_string()]);
    }

    #[tokio::test]
    async fn leave_clears_binding() {
        let cache = Arc::new(MemorySessionCache::new());
        let binder = SessionBinder::new(cache.clone());
        let (client, _outbound) = ClientConnection::new(None);

        binder.join(join_request("u1", "r1"), client.clone()).await.unwrap();
        let response = binder
            .leave(Request::new(LEAVE_ACTION, json!({})), client.clone())
            .await
            .unwrap();

        assert_eq!(response.payload["left"], true);
        assert!(cache.is_empty());
        assert!(!client.in_room("r1"));
        assert!(client.metadata_str(ROOM_ID_KEY).is_none());
    }

    #[tokio::test]
    async fn close_evicts_mapping() {
        let cache = Arc::new(MemorySessionCache::new());
        let binder = SessionBinder::new(cache.clone());
        let (client, _outbound) = ClientConnection::new(None);

        binder.join(join_request("u1", "r1"), client.clone()).await.unwrap();
        client.notify_disconnect("client closed");

        eventually_unmapped(&cache, "u1", "r1").await;
    }

    #[tokio::test]
    async fn close_keeps_newer_connection_mapping() {
        let cache = Arc::new(MemorySessionCache::new());
        let binder = SessionBinder::new(cache.clone());
        let (old, _old_out) = ClientConnection::new(None);
        let (new, _new_out) = ClientConnection::new(None);

        binder.join(join_request("u1", "r1"), old.clone()).await.unwrap();
        binder.join(join_request("u1", "r1"), new.clone()).await.unwrap();
        old.notify_disconnect("client closed");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get_socket_id("u1", "r1").await, Some(new.id()));
    }

    /// Reads always report `stale`, as when another gateway rebinds the user
    /// between a read and a delete.
    struct StaleReadCache {
        inner: MemorySessionCache,
        stale: String,
    }

    #[async_trait::async_trait]
    impl SessionCache for StaleReadCache {
        async fn get_socket_id(&self, _user_id: &str, _room_id: &str) -> Option<String> {
            Some(self.stale.clone())
        }

        async fn get_socket_ids(&self, user_ids: &[String], room_id: &str) -> std::collections::HashMap<String, Option<String>> {
            self.inner.get_socket_ids(user_ids, room_id).await
        }

        async fn set_socket_mapping(&self, user_id: &str, room_id: &str, socket_id: &str) -> Result<(), ProviderError> {
            self.inner.set_socket_mapping(user_id, room_id, socket_id).await
        }

        async fn remove_socket_mapping(&self, user_id: &str, room_id: &str) -> Result<(), ProviderError> {
            self.inner.remove_socket_mapping(user_id, room_id).await
        }

        async fn remove_socket_mapping_if(
            &self,
            user_id: &str,
            room_id: &str,
            socket_id: &str,
        ) -> Result<bool, ProviderError> {
            self.inner.remove_socket_mapping_if(user_id, room_id, socket_id).await
        }
    }

    #[tokio::test]
    async fn release_never_evicts_a_concurrent_rebind() {
        let (old, _old_out) = ClientConnection::new(None);
        let cache = Arc::new(StaleReadCache {
            inner: MemorySessionCache::new(),
            stale: old.id(),
        });
        let binder = SessionBinder::new(cache.clone());

        binder.join(join_request("u1", "r1"), old.clone()).await.unwrap();
        // Another gateway binds a newer connection.
        cache.inner.set_socket_mapping("u1", "r1", "remote-socket").await.unwrap();

        binder.leave(Request::new(LEAVE_ACTION, json!({})), old.clone()).await.unwrap();
        assert_eq!(
            cache.inner.get_socket_id("u1", "r1").await.as_deref(),
            Some("remote-socket")
        );
    }

    #[tokio::test]
    async fn registers_both_actions() {
        let binder = SessionBinder::new(Arc::new(MemorySessionCache::new()));
        let requests = RequestRegistry::new();
        binder.register(&requests).unwrap();

        assert!(requests.has_handler(JOIN_ACTION));
        assert!(requests.has_handler(LEAVE_ACTION));
        assert!(binder.register(&requests).is_err());
    }
}
