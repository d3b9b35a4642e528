//! Per-room broadcast bridge
//!
//! One bridge task runs per room with at least one subscriber. It consumes the
//! room's external pub/sub channel, resolves each published message id against
//! the history store, and fans the full message out through the registry.
//!
//! The bridge is spawned by whichever registration observed `first_in_room`
//! and lives exactly as long as the room entry: the registry cancels the room
//! token when the last subscriber unregisters, and the bridge exits on it.
//! Per-message failures (store read error, malformed record, non-UTF-8
//! payload) are logged and skipped, never fatal.
//!
//! Ordering: subscribers see messages in the order this bridge resolves them,
//! which follows publish order on the room channel. Resolution is not atomic
//! with delivery, so the guarantee is per-bridge, not linearizable across
//! relay instances.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::message::Message;
use crate::registry::RoomRegistry;
use crate::store::{keys, Store};

/// Handle to a spawned per-room bridge task
pub struct RoomBridge;

impl RoomBridge {
    /// Spawn the bridge for `room_id`, scoped to `token`
    pub fn spawn(
        store: Arc<dyn Store>,
        registry: Arc<RoomRegistry>,
        room_id: String,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            Self::run(store, registry, room_id, token).await;
        })
    }

    async fn run(
        store: Arc<dyn Store>,
        registry: Arc<RoomRegistry>,
        room_id: String,
        token: CancellationToken,
    ) {
        let channel = keys::room_channel(&room_id);
        let mut subscription = match store.subscribe(&channel).await {
            Ok(sub) => sub,
            Err(e) => {
                // No live delivery until a new first-subscriber re-establishes
                // the bridge; history is unaffected.
                tracing::error!(room = %room_id, error = %e, "bridge subscription failed");
                return;
            }
        };

        tracing::debug!(room = %room_id, "bridge started");

        loop {
            tokio::select! {
                () = token.cancelled() => {
                    tracing::debug!(room = %room_id, "bridge cancelled, room empty");
                    break;
                }
                next = subscription.next_message() => {
                    match next {
                        Ok(Some(payload)) => {
                            Self::deliver(&*store, &registry, &room_id, &payload).await;
                        }
                        Ok(None) => {
                            tracing::info!(room = %room_id, "pub/sub channel closed, bridge exiting");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(room = %room_id, error = %e, "pub/sub receive error, bridge exiting");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Resolve one published id and broadcast it; failures skip the message
    async fn deliver(store: &dyn Store, registry: &RoomRegistry, room_id: &str, payload: &[u8]) {
        let message_id = match std::str::from_utf8(payload) {
            Ok(id) => id,
            Err(_) => {
                tracing::warn!(room = %room_id, "discarding non-utf8 pub/sub payload");
                return;
            }
        };

        let fields = match store.hash_get_all(&keys::message_record(message_id)).await {
            Ok(fields) => fields,
            Err(e) => {
                tracing::warn!(
                    room = %room_id,
                    message = %message_id,
                    error = %e,
                    "failed to resolve published message, skipping"
                );
                return;
            }
        };

        let message = match Message::from_record(message_id, &fields) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(room = %room_id, error = %e, "malformed message record, skipping");
                return;
            }
        };

        let report = registry.broadcast(room_id, &message).await;
        tracing::trace!(
            room = %room_id,
            message = %message_id,
            delivered = report.delivered,
            dropped = report.dropped,
            "message fanned out"
        );
    }
}
