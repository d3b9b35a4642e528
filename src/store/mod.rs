//! External store boundary
//!
//! The relay delegates membership bookkeeping, message history, and cross-process
//! publish/subscribe to an ordered key-value store reachable behind the [`Store`]
//! trait. Only the primitives the relay actually uses are modeled: unordered
//! string sets, newest-first string lists, flat field maps, and fire-and-forget
//! pub/sub channels.
//!
//! [`memory::MemoryStore`] is the in-process reference implementation, used by
//! the demo server and the test suite. A networked backend (e.g. a Redis client)
//! implements the same trait; the key conventions in [`keys`] match the original
//! deployment so the two can interoperate.

pub mod keys;
pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;

pub use memory::MemoryStore;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend failed or became unreachable
    #[error("store backend error: {0}")]
    Backend(String),

    /// The store (or one of its pub/sub channels) was shut down
    #[error("store closed")]
    Closed,
}

/// A live subscription to one pub/sub channel
///
/// Dropping the subscription releases it.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next published payload
    ///
    /// Returns `Ok(None)` once the channel is closed. A subscriber that falls
    /// behind may miss payloads; pub/sub delivery is fire-and-forget.
    async fn next_message(&mut self) -> Result<Option<Bytes>, StoreError>;
}

/// Ordered key-value store with pub/sub, as seen by the relay
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Add a member to an unordered set
    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Remove a member from a set; absent members are a no-op
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// Membership test
    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Push a value to the front of a list (newest-first convention)
    async fn list_push_front(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Keep only the inclusive index range `[start, stop]` of a list
    async fn list_trim(&self, key: &str, start: usize, stop: usize) -> Result<(), StoreError>;

    /// Read the inclusive index range `[start, stop]` of a list
    ///
    /// Out-of-range indices are clamped; a missing key yields an empty vec.
    async fn list_range(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<String>, StoreError>;

    /// Set fields on a field-map record, creating it if absent
    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError>;

    /// Read all fields of a record; a missing key yields an empty map
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Publish a payload to a channel
    ///
    /// Delivery is best-effort to current subscribers only; publishing to a
    /// channel nobody listens on succeeds and drops the payload.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), StoreError>;

    /// Subscribe to a channel
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, StoreError>;
}
