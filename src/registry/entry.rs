//! Per-room subscriber state
//!
//! One entry exists per room with at least one open stream. The entry owns the
//! outbound senders and the cancellation token scoping the room's broadcast
//! bridge.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::message::Message;

/// One subscriber's outbound channel, tagged with its registration epoch
///
/// The epoch distinguishes a live registration from a retired one so a stale
/// session can never evict its replacement.
pub(super) struct SubscriberSlot {
    pub(super) tx: mpsc::Sender<Message>,
    pub(super) epoch: u64,
}

/// Outcome of fanning one message out to a room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOut {
    /// Subscribers the message was queued for
    pub delivered: usize,
    /// Subscribers whose channel was full (message dropped for them)
    pub dropped: usize,
}

/// Subscriber state for a single room
pub(super) struct RoomEntry {
    /// user id -> outbound slot
    subscribers: HashMap<String, SubscriberSlot>,

    /// Cancelled when the last subscriber unregisters; the room's bridge
    /// task exits on it
    cancel: CancellationToken,

    /// Messages dropped on full channels since the entry was created
    dropped: AtomicU64,
}

impl RoomEntry {
    pub(super) fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
            cancel: CancellationToken::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Token tied to "this room has subscribers"
    pub(super) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Install a subscriber, returning the retired slot if one existed
    pub(super) fn insert(
        &mut self,
        user_id: &str,
        tx: mpsc::Sender<Message>,
        epoch: u64,
    ) -> Option<SubscriberSlot> {
        self.subscribers
            .insert(user_id.to_string(), SubscriberSlot { tx, epoch })
    }

    /// Remove the subscriber only if it still carries `epoch`
    pub(super) fn remove_if_epoch(&mut self, user_id: &str, epoch: u64) -> bool {
        match self.subscribers.get(user_id) {
            Some(slot) if slot.epoch == epoch => {
                self.subscribers.remove(user_id);
                true
            }
            _ => false,
        }
    }

    /// Remove the subscriber regardless of epoch (leave-room path)
    pub(super) fn remove(&mut self, user_id: &str) -> bool {
        self.subscribers.remove(user_id).is_some()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub(super) fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub(super) fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Signal the bridge to stop; called when the entry is retired
    pub(super) fn cancel_bridge(&self) {
        self.cancel.cancel();
    }

    /// Queue a message for every subscriber without blocking
    ///
    /// A full channel drops the message for that subscriber only. A closed
    /// channel means its unregister is in flight and is skipped.
    pub(super) fn fan_out(&self, message: &Message) -> FanOut {
        let mut report = FanOut {
            delivered: 0,
            dropped: 0,
        };

        for (user_id, slot) in &self.subscribers {
            match slot.tx.try_send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        room = %message.room_id,
                        user = %user_id,
                        "subscriber channel full, dropping message"
                    );
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg() -> Message {
        Message::new("alice", "weather", "hello")
    }

    #[test]
    fn test_insert_replaces() {
        let mut entry = RoomEntry::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, _rx2) = mpsc::channel(4);

        assert!(entry.insert("alice", tx1, 1).is_none());
        let retired = entry.insert("alice", tx2, 2).unwrap();
        assert_eq!(retired.epoch, 1);
        assert_eq!(entry.subscriber_count(), 1);

        // Dropping the retired slot closes the old receiver
        drop(retired);
        assert!(matches!(
            rx1.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_remove_if_epoch_guards_replacement() {
        let mut entry = RoomEntry::new();
        let (tx1, _rx1) = mpsc::channel(4);
        let (tx2, _rx2) = mpsc::channel(4);

        entry.insert("alice", tx1, 1);
        entry.insert("alice", tx2, 2);

        // Stale epoch does not evict the replacement
        assert!(!entry.remove_if_epoch("alice", 1));
        assert_eq!(entry.subscriber_count(), 1);

        assert!(entry.remove_if_epoch("alice", 2));
        assert!(entry.is_empty());
    }

    #[test]
    fn test_fan_out_full_channel_drops_for_that_subscriber_only() {
        let mut entry = RoomEntry::new();
        let (tx_full, _rx_full) = mpsc::channel(1);
        let (tx_ok, mut rx_ok) = mpsc::channel(4);

        entry.insert("slow", tx_full.clone(), 1);
        entry.insert("fast", tx_ok, 2);

        // Fill the slow subscriber's channel
        tx_full.try_send(msg()).unwrap();

        let report = entry.fan_out(&msg());
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(entry.dropped_total(), 1);

        // The fast subscriber still got it
        assert!(rx_ok.try_recv().is_ok());
    }

    #[test]
    fn test_fan_out_skips_closed() {
        let mut entry = RoomEntry::new();
        let (tx, rx) = mpsc::channel(4);
        entry.insert("gone", tx, 1);
        drop(rx);

        let report = entry.fan_out(&msg());
        assert_eq!(report.delivered, 0);
        assert_eq!(report.dropped, 0);
    }
}
