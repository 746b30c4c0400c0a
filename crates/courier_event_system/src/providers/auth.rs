//! Permission and room-membership source.
//!
//! Permissions and membership are independent: granting a permission never
//! adds a user to a room, and vice versa.

use crate::error::ProviderError;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::BTreeSet;

#[async_trait]
pub trait AuthProvider: Send + Sync + 'static {
    async fn check_permission(&self, user_id: &str, room_id: &str, action: &str) -> Result<bool, ProviderError>;

    async fn get_authorized_users_in_room(&self, room_id: &str) -> Result<Vec<String>, ProviderError>;
}

/// Single-process auth provider backed by in-memory sets.
#[derive(Default)]
pub struct MemoryAuthProvider {
    permissions: DashSet<(String, String, String)>,
    rooms: DashMap<String, BTreeSet<String>>,
}

impl MemoryAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn permission_key(user_id: &str, room_id: &str, action: &str) -> (String, String, String) {
        (user_id.to_string(), room_id.to_string(), action.to_string())
    }

    pub fn grant_permission(&self, user_id: &str, room_id: &str, action: &str) {
        self.permissions.insert(Self::permission_key(user_id, room_id, action));
    }

    pub fn revoke_permission(&self, user_id: &str, room_id: &str, action: &str) {
        self.permissions.remove(&Self::permission_key(user_id, room_id, action));
    }

    pub fn add_user_to_room(&self, user_id: &str, room_id: &str) {
        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(user_id.to_string());
    }

    /// Removes a member. The room disappears with its last member.
    pub fn remove_user_from_room(&self, user_id: &str, room_id: &str) {
        if let Some(mut members) = self.rooms.get_mut(room_id) {
            members.remove(user_id);
        }
        self.rooms.remove_if(room_id, |_, members| members.is_empty());
    }
}

#[async_trait]
impl AuthProvider for MemoryAuthProvider {
    async fn check_permission(&self, user_id: &str, room_id: &str, action: &str) -> Result<bool, ProviderError> {
        Ok(self
            .permissions
            .contains(&Self::permission_key(user_id, room_id, action)))
    }

    /// Members in user-id order.
    async fn get_authorized_users_in_room(&self, room_id: &str) -> Result<Vec<String>, ProviderError> {
        Ok(self
            .rooms
            .get(room_id)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }
}
