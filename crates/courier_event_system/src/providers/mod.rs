//! # Providers
//!
//! Capability seams the processor depends on, each with an in-memory
//! implementation and, where a shared store is needed across processes, a
//! Redis one.

pub mod auth;
pub mod session_cache;

pub use auth::{AuthProvider, MemoryAuthProvider};
pub use session_cache::{MemorySessionCache, RedisSessionCache, SessionCache, DEFAULT_KEY_PREFIX};
