//! In-memory store implementation
//!
//! Reference backend for single-process deployments and tests. Sets, lists,
//! and field maps live behind one `RwLock`; each pub/sub channel is a
//! `tokio::sync::broadcast` sender created on first use by either side.
//!
//! Broadcast semantics match fire-and-forget pub/sub: subscribers that lag
//! past the channel capacity skip ahead and miss payloads rather than stalling
//! publishers.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, RwLock};

use super::{Store, StoreError, Subscription};

/// Capacity of each pub/sub broadcast channel
const CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct Shared {
    sets: HashMap<String, HashSet<String>>,
    lists: HashMap<String, VecDeque<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
    channels: HashMap<String, broadcast::Sender<Bytes>>,
}

/// In-memory [`Store`] backend
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Shared>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let emptied = match inner.sets.get_mut(key) {
            Some(set) => {
                set.remove(member);
                set.is_empty()
            }
            None => false,
        };
        if emptied {
            inner.sets.remove(key);
        }
        Ok(())
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.sets.get(key).is_some_and(|s| s.contains(member)))
    }

    async fn list_push_front(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn list_trim(&self, key: &str, start: usize, stop: usize) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(list) = inner.lists.get_mut(key) {
            let end = stop.saturating_add(1).min(list.len());
            if start >= end {
                list.clear();
            } else {
                list.truncate(end);
                list.drain(..start);
            }
        }
        Ok(())
    }

    async fn list_range(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read().await;
        let Some(list) = inner.lists.get(key) else {
            return Ok(Vec::new());
        };
        let end = stop.saturating_add(1).min(list.len());
        if start >= end {
            return Ok(Vec::new());
        }
        Ok(list.range(start..end).cloned().collect())
    }

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let record = inner.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            record.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), StoreError> {
        let inner = self.inner.read().await;
        if let Some(tx) = inner.channels.get(channel) {
            // send() errors when there are no receivers; that matches
            // publish-to-nobody being a successful drop.
            let _ = tx.send(payload);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, StoreError> {
        let mut inner = self.inner.write().await;
        let tx = inner
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Ok(Box::new(MemorySubscription { rx: tx.subscribe() }))
    }
}

struct MemorySubscription {
    rx: broadcast::Receiver<Bytes>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_message(&mut self) -> Result<Option<Bytes>, StoreError> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Ok(Some(payload)),
                // Fell behind the channel capacity: payloads in between are
                // gone, keep delivering from the current position.
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "pub/sub subscriber lagged, payloads dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}
