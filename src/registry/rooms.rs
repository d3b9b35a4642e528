//! Room subscription registry implementation
//!
//! The central directory of active outbound channels, keyed by room then user.
//! All subscriber lifecycle goes through here; callers never see the raw map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use super::entry::{FanOut, RoomEntry};
use crate::config::RelayConfig;
use crate::message::Message;

/// Handle returned to a stream session by [`RoomRegistry::register`]
pub struct Registration {
    /// Receiving end of the fresh outbound channel
    pub receiver: mpsc::Receiver<Message>,

    /// Epoch of this registration; pass back to `unregister`
    pub epoch: u64,

    /// Whether this registration created the room entry
    ///
    /// Exactly one concurrent first-subscriber observes `true`; that caller
    /// must spawn the room's broadcast bridge.
    pub first_in_room: bool,

    /// Token cancelled when the room loses its last subscriber
    pub room_token: CancellationToken,
}

/// Point-in-time stats for one room's subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomStats {
    /// Currently registered subscribers
    pub subscriber_count: usize,
    /// Messages dropped on full channels over the entry's lifetime
    pub dropped_messages: u64,
}

/// Thread-safe directory of active per-subscriber outbound channels
///
/// Read-heavy: broadcasts across different rooms only contend on the read
/// lock; registration changes take the write lock.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, RoomEntry>>,
    next_epoch: AtomicU64,
    config: RelayConfig,
}

impl RoomRegistry {
    /// Create a registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RelayConfig::default())
    }

    /// Create a registry with custom configuration
    pub fn with_config(config: RelayConfig) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            next_epoch: AtomicU64::new(1),
            config,
        }
    }

    /// Register a subscriber, retiring any prior channel for (room, user)
    ///
    /// The retired sender is dropped under the lock; the prior session's
    /// receiver observes closure and tears itself down. Its later unregister
    /// carries a stale epoch and leaves this registration untouched.
    pub async fn register(&self, room_id: &str, user_id: &str) -> Registration {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);

        let mut rooms = self.rooms.write().await;
        let first_in_room = !rooms.contains_key(room_id);
        let entry = rooms
            .entry(room_id.to_string())
            .or_insert_with(RoomEntry::new);

        let retired = entry.insert(user_id, tx, epoch);
        let room_token = entry.cancel_token();

        if retired.is_some() {
            tracing::info!(
                room = %room_id,
                user = %user_id,
                epoch,
                "replacing existing stream registration"
            );
        } else {
            tracing::info!(
                room = %room_id,
                user = %user_id,
                epoch,
                subscribers = entry.subscriber_count(),
                "stream registered"
            );
        }

        Registration {
            receiver: rx,
            epoch,
            first_in_room,
            room_token,
        }
    }

    /// Remove a registration if it is still current
    ///
    /// No-op when the epoch is stale (the subscriber was replaced) or the
    /// entry is already gone (leave-room removed it). When the last
    /// subscriber goes, the room token is cancelled and the entry dropped.
    pub async fn unregister(&self, room_id: &str, user_id: &str, epoch: u64) -> bool {
        let mut rooms = self.rooms.write().await;

        let became_empty = {
            let Some(entry) = rooms.get_mut(room_id) else {
                return false;
            };
            if !entry.remove_if_epoch(user_id, epoch) {
                return false;
            }

            tracing::info!(
                room = %room_id,
                user = %user_id,
                epoch,
                subscribers = entry.subscriber_count(),
                "stream unregistered"
            );

            if entry.is_empty() {
                entry.cancel_bridge();
                true
            } else {
                false
            }
        };

        if became_empty {
            rooms.remove(room_id);
            tracing::debug!(room = %room_id, "last subscriber left, room entry removed");
        }
        true
    }

    /// Remove whatever registration (room, user) currently holds
    ///
    /// Leave-room path: retires the user's live stream regardless of epoch.
    /// Absent entries are a no-op, so calling this twice is safe.
    pub async fn remove_subscriber(&self, room_id: &str, user_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;

        let became_empty = {
            let Some(entry) = rooms.get_mut(room_id) else {
                return false;
            };
            if !entry.remove(user_id) {
                return false;
            }

            tracing::info!(room = %room_id, user = %user_id, "subscriber removed");

            if entry.is_empty() {
                entry.cancel_bridge();
                true
            } else {
                false
            }
        };

        if became_empty {
            rooms.remove(room_id);
            tracing::debug!(room = %room_id, "last subscriber left, room entry removed");
        }
        true
    }

    /// Fan a message out to every current subscriber of a room
    ///
    /// Non-blocking: full channels drop the message for that subscriber and
    /// are counted; one slow consumer never delays the others.
    pub async fn broadcast(&self, room_id: &str, message: &Message) -> FanOut {
        let rooms = self.rooms.read().await;

        match rooms.get(room_id) {
            Some(entry) => entry.fan_out(message),
            None => FanOut {
                delivered: 0,
                dropped: 0,
            },
        }
    }

    /// Number of subscribers currently registered for a room
    pub async fn subscriber_count(&self, room_id: &str) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map_or(0, |e| e.subscriber_count())
    }

    /// Stats for one room, if it has subscribers
    pub async fn room_stats(&self, room_id: &str) -> Option<RoomStats> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map(|e| RoomStats {
            subscriber_count: e.subscriber_count(),
            dropped_messages: e.dropped_total(),
        })
    }

    /// Number of rooms with at least one subscriber
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
