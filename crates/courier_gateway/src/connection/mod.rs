//! Connection management for client connections.
//!
//! This module handles the lifecycle of client connections, including
//! connection tracking, per-connection metadata and rooms, and the outbound
//! frame queue.

pub mod client;
pub mod manager;

pub use client::{ClientConnection, Outbound, ROOM_ID_KEY, USER_ID_KEY};
pub use manager::ConnectionManager;
