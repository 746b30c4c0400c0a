//! Distributed mapping of (user, room) → live connection id.
//!
//! Entries have no expiry. The gateway removes a mapping when the connection
//! closes.

use crate::error::ProviderError;
use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::{debug, error};

/// Default Redis key prefix for session mappings.
pub const DEFAULT_KEY_PREFIX: &str = "socket:";

const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

#[async_trait]
pub trait SessionCache: Send + Sync + 'static {
    /// Current connection id for `(user_id, room_id)`. Backend failures are
    /// logged and reported as `None`.
    async fn get_socket_id(&self, user_id: &str, room_id: &str) -> Option<String>;

    /// Batch lookup. The result has an entry for every requested user, even
    /// when the backend is unreachable.
    async fn get_socket_ids(&self, user_ids: &[String], room_id: &str) -> HashMap<String, Option<String>>;

    /// Records `socket_id` as the current connection. Last write wins.
    async fn set_socket_mapping(&self, user_id: &str, room_id: &str, socket_id: &str) -> Result<(), ProviderError>;

    async fn remove_socket_mapping(&self, user_id: &str, room_id: &str) -> Result<(), ProviderError>;

    /// Removes the mapping only while it still names `socket_id`, as one
    /// atomic step. Returns whether a mapping was removed.
    async fn remove_socket_mapping_if(
        &self,
        user_id: &str,
        room_id: &str,
        socket_id: &str,
    ) -> Result<bool, ProviderError>;
}

/// Single-process session cache.
#[derive(Default)]
pub struct MemorySessionCache {
    mappings: DashMap<(String, String), String>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    async fn get_socket_id(&self, user_id: &str, room_id: &str) -> Option<String> {
        self.mappings
            .get(&(user_id.to_string(), room_id.to_string()))
            .map(|entry| entry.value().clone())
    }

    async fn get_socket_ids(&self, user_ids: &[String], room_id: &str) -> HashMap<String, Option<String>> {
        let mut result = HashMap::with_capacity(user_ids.len());
        for user_id in user_ids {
            let socket_id = self.get_socket_id(user_id, room_id).await;
            result.insert(user_id.clone(), socket_id);
        }
        result
    }

    async fn set_socket_mapping(&self, user_id: &str, room_id: &str, socket_id: &str) -> Result<(), ProviderError> {
        self.mappings
            .insert((user_id.to_string(), room_id.to_string()), socket_id.to_string());
        Ok(())
    }

    async fn remove_socket_mapping(&self, user_id: &str, room_id: &str) -> Result<(), ProviderError> {
        self.mappings.remove(&(user_id.to_string(), room_id.to_string()));
        Ok(())
    }

    async fn remove_socket_mapping_if(
        &self,
        user_id: &str,
        room_id: &str,
        socket_id: &str,
    ) -> Result<bool, ProviderError> {
        let removed = self
            .mappings
            .remove_if(&(user_id.to_string(), room_id.to_string()), |_, current| current == socket_id);
        Ok(removed.is_some())
    }
}

/// Redis-backed session cache keyed `<prefix><user>:<room>`.
///
/// Connects lazily and drops the cached connection after any command failure,
/// so the next call reconnects.
pub struct RedisSessionCache {
    client: redis::Client,
    connection: tokio::sync::Mutex<Option<MultiplexedConnection>>,
    key_prefix: String,
    compare_and_delete: redis::Script,
}

impl RedisSessionCache {
    pub fn new(url: &str) -> Result<Self, ProviderError> {
        Self::with_prefix(url, DEFAULT_KEY_PREFIX)
    }

    pub fn with_prefix(url: &str, key_prefix: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            connection: tokio::sync::Mutex::new(None),
            key_prefix: key_prefix.into(),
            compare_and_delete: redis::Script::new(COMPARE_AND_DELETE),
        })
    }

    fn key(&self, user_id: &str, room_id: &str) -> String {
        format!("{}{}:{}", self.key_prefix, user_id, room_id)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, ProviderError> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self.client.get_multiplexed_async_connection().await?;
        debug!("🔌 Session cache connected");
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn reset(&self) {
        *self.connection.lock().await = None;
    }

    async fn try_get(&self, key: &str) -> Result<Option<String>, ProviderError> {
        let mut conn = self.connection().await?;
        Ok(conn.get(key).await?)
    }

    async fn try_mget(&self, keys: Vec<String>) -> Result<Vec<Option<String>>, ProviderError> {
        let mut conn = self.connection().await?;
        Ok(conn.mget(keys).await?)
    }

    async fn reset_on_error<T>(&self, result: Result<T, ProviderError>) -> Result<T, ProviderError> {
        if result.is_err() {
            self.reset().await;
        }
        result
    }
}

#[async_trait]
impl SessionCache for RedisSessionCache {
    async fn get_socket_id(&self, user_id: &str, room_id: &str) -> Option<String> {
        let key = self.key(user_id, room_id);
        let result = self.try_get(&key).await;
        match self.reset_on_error(result).await {
            Ok(socket_id) => socket_id,
            Err(e) => {
                error!("❌ Session lookup for {} failed: {}", key, e);
                None
            }
        }
    }

    async fn get_socket_ids(&self, user_ids: &[String], room_id: &str) -> HashMap<String, Option<String>> {
        let mut result: HashMap<String, Option<String>> =
            user_ids.iter().map(|user_id| (user_id.clone(), None)).collect();
        if user_ids.is_empty() {
            return result;
        }

        let keys: Vec<String> = user_ids.iter().map(|user_id| self.key(user_id, room_id)).collect();
        let lookup = self.try_mget(keys).await;
        match self.reset_on_error(lookup).await {
            Ok(values) => {
                for (user_id, socket_id) in user_ids.iter().zip(values) {
                    result.insert(user_id.clone(), socket_id);
                }
            }
            Err(e) => error!("❌ Batch session lookup in room {} failed: {}", room_id, e),
        }
        result
    }

    async fn set_socket_mapping(&self, user_id: &str, room_id: &str, socket_id: &str) -> Result<(), ProviderError> {
        let key = self.key(user_id, room_id);
        let result = async {
            let mut conn = self.connection().await?;
            let _: () = conn.set(&key, socket_id).await?;
            Ok::<(), ProviderError>(())
        }
        .await;
        self.reset_on_error(result).await
    }

    async fn remove_socket_mapping(&self, user_id: &str, room_id: &str) -> Result<(), ProviderError> {
        let key = self.key(user_id, room_id);
        let result = async {
            let mut conn = self.connection().await?;
            let _: () = conn.del(&key).await?;
            Ok::<(), ProviderError>(())
        }
        .await;
        self.reset_on_error(result).await
    }

    async fn remove_socket_mapping_if(
        &self,
        user_id: &str,
        room_id: &str,
        socket_id: &str,
    ) -> Result<bool, ProviderError> {
        let key = self.key(user_id, room_id);
        let result = async {
            let mut conn = self.connection().await?;
            let removed: i64 = self
                .compare_and_delete
                .key(&key)
                .arg(socket_id)
                .invoke_async(&mut conn)
                .await?;
            Ok::<bool, ProviderError>(removed > 0)
        }
        .await;
        self.reset_on_error(result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_cache_last_write_wins() {
        let cache = MemorySessionCache::new();
        cache.set_socket_mapping("u1", "r1", "s1").await.unwrap();
        cache.set_socket_mapping("u1", "r1", "s2").await.unwrap();
        assert_eq!(cache.get_socket_id("u1", "r1").await.as_deref(), Some("s2"));
        assert_eq!(cache.get_socket_id("u1", "r2").await, None);

        cache.remove_socket_mapping("u1", "r1").await.unwrap();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn memory_conditional_remove_checks_owner() {
        let cache = MemorySessionCache::new();
        cache.set_socket_mapping("u1", "r1", "s2").await.unwrap();

        assert!(!cache.remove_socket_mapping_if("u1", "r1", "s1").await.unwrap());
        assert_eq!(cache.get_socket_id("u1", "r1").await.as_deref(), Some("s2"));

        assert!(cache.remove_socket_mapping_if("u1", "r1", "s2").await.unwrap());
        assert!(cache.is_empty());
        assert!(!cache.remove_socket_mapping_if("u1", "r1", "s2").await.unwrap());
    }

    #[tokio::test]
    async fn memory_batch_covers_every_user() {
        let cache = MemorySessionCache::new();
        cache.set_socket_mapping("u1", "r1", "s1").await.unwrap();

        let users = vec!["u1".to_string(), "u2".to_string()];
        let ids = cache.get_socket_ids(&users, "r1").await;
        assert_eq!(ids.len(), 2);
        assert_eq!(ids["u1"].as_deref(), Some("s1"));
        assert_eq!(ids["u2"], None);
    }

    #[tokio::test]
    async fn redis_batch_is_complete_when_unreachable() {
        // Nothing listens on port 1, so every command fails to connect.
        let cache = RedisSessionCache::new("redis://127.0.0.1:1/").unwrap();
        let users = vec!["u1".to_string(), "u2".to_string()];

        let ids = cache.get_socket_ids(&users, "r1").await;
        assert_eq!(ids.len(), 2);
        assert!(ids.values().all(Option::is_none));

        assert_eq!(cache.get_socket_id("u1", "r1").await, None);
        assert!(cache.set_socket_mapping("u1", "r1", "s1").await.is_err());
        assert!(cache.remove_socket_mapping_if("u1", "r1", "s1").await.is_err());
    }

    #[test]
    fn redis_keys_use_prefix() {
        let cache = RedisSessionCache::with_prefix("redis://127.0.0.1/", "sess:").unwrap();
        assert_eq!(cache.key("u1", "r1"), "sess:u1:r1");
    }
}
