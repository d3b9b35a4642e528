//! Relay request handlers
//!
//! Thin operations over the store and the registry: validate, mutate, and
//! (for streams) hand off to a [`StreamSession`]. All four operations of the
//! relay surface live here; the transport layer only does framing.
//!
//! Delivery path: `send_message` publishes the message id to the room's
//! pub/sub channel and nothing else. The room's single bridge is the only
//! fan-out path, so a message is delivered at most once per subscriber even
//! when publisher and subscriber share a process.

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::message::Message;
use crate::registry::RoomRegistry;
use crate::session::{MessageSink, StreamSession};
use crate::store::{keys, Store};

/// The relay service: join, send, leave, stream
///
/// Cheap to clone-by-Arc into per-connection tasks.
pub struct RelayService {
    store: Arc<dyn Store>,
    registry: Arc<RoomRegistry>,
    config: RelayConfig,
}

impl RelayService {
    /// Create a service with default configuration
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_config(store, RelayConfig::default())
    }

    /// Create a service with custom configuration
    pub fn with_config(store: Arc<dyn Store>, config: RelayConfig) -> Self {
        Self {
            store,
            registry: Arc::new(RoomRegistry::with_config(config.clone())),
            config,
        }
    }

    /// The subscription registry backing this service
    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Current configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Join a room and return its recent history, oldest first
    pub async fn join_room(&self, user_id: &str, room_id: &str) -> Result<Vec<Message>> {
        require(user_id, "user_id is required")?;
        require(room_id, "room_id is required")?;

        self.store
            .set_add(&keys::room_members(room_id), user_id)
            .await?;
        self.store
            .set_add(&keys::user_rooms(user_id), room_id)
            .await?;

        tracing::info!(room = %room_id, user = %user_id, "user joined room");

        if self.config.recent_limit == 0 {
            return Ok(Vec::new());
        }

        let ids = self
            .store
            .list_range(
                &keys::room_messages(room_id),
                0,
                self.config.recent_limit.saturating_sub(1),
            )
            .await?;

        // Resolve newest-first ids; a single unreadable record must not fail
        // the join, so resolution failures are logged and skipped.
        let mut recent = Vec::with_capacity(ids.len());
        for id in &ids {
            let fields = match self.store.hash_get_all(&keys::message_record(id)).await {
                Ok(fields) => fields,
                Err(e) => {
                    tracing::warn!(message = %id, error = %e, "skipping unreadable history record");
                    continue;
                }
            };
            match Message::from_record(id.as_str(), &fields) {
                Ok(message) => recent.push(message),
                Err(e) => {
                    tracing::warn!(message = %id, error = %e, "skipping malformed history record");
                }
            }
        }

        recent.reverse();
        Ok(recent)
    }

    /// Publish a message to a room the sender is a member of
    pub async fn send_message(
        &self,
        user_id: &str,
        room_id: &str,
        content: &str,
    ) -> Result<Message> {
        require(user_id, "user_id is required")?;
        require(room_id, "room_id is required")?;
        require(content, "content is required")?;

        let member = self
            .store
            .set_contains(&keys::room_members(room_id), user_id)
            .await?;
        if !member {
            return Err(RelayError::PermissionDenied {
                user_id: user_id.to_string(),
                room_id: room_id.to_string(),
            });
        }

        let message = Message::new(user_id, room_id, content);

        self.store
            .hash_set(&keys::message_record(&message.id), &message.to_record())
            .await?;
        self.store
            .list_push_front(&keys::room_messages(room_id), &message.id)
            .await?;

        // Bounded history: keep the newest `history_limit` ids. A failed trim
        // only delays eviction, so it is logged rather than surfaced.
        if let Err(e) = self
            .store
            .list_trim(
                &keys::room_messages(room_id),
                0,
                self.config.history_limit.saturating_sub(1),
            )
            .await
        {
            tracing::warn!(room = %room_id, error = %e, "history trim failed");
        }

        // The message is already in history; a failed publish loses live
        // delivery for this message but the send still succeeded. Accepted
        // inconsistency window, not retried.
        if let Err(e) = self
            .store
            .publish(&keys::room_channel(room_id), Bytes::from(message.id.clone()))
            .await
        {
            tracing::error!(room = %room_id, message = %message.id, error = %e, "publish failed");
        }

        tracing::debug!(room = %room_id, user = %user_id, message = %message.id, "message sent");
        Ok(message)
    }

    /// Leave a room, retiring any open stream the user holds for it
    ///
    /// Idempotent: leaving a room twice (or without ever streaming) succeeds.
    pub async fn leave_room(&self, user_id: &str, room_id: &str) -> Result<()> {
        require(user_id, "user_id is required")?;
        require(room_id, "room_id is required")?;

        self.store
            .set_remove(&keys::room_members(room_id), user_id)
            .await?;
        self.store
            .set_remove(&keys::user_rooms(user_id), room_id)
            .await?;

        self.registry.remove_subscriber(room_id, user_id).await;

        tracing::info!(room = %room_id, user = %user_id, "user left room");
        Ok(())
    }

    /// Stream room messages into `sink` until the stream ends
    ///
    /// Errors immediately if the user is not a member. Runs until `cancel`
    /// fires, the registration is retired, the sink fails, or the safety-net
    /// duration bound is hit.
    pub async fn stream_messages<S>(
        &self,
        user_id: &str,
        room_id: &str,
        sink: &mut S,
        cancel: CancellationToken,
    ) -> Result<()>
    where
        S: MessageSink + ?Sized,
    {
        require(user_id, "user_id is required")?;
        require(room_id, "room_id is required")?;

        let session = StreamSession::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            self.config.clone(),
            user_id,
            room_id,
        );
        session.run(sink, cancel).await
    }
}

fn require(value: &str, message: &'static str) -> Result<()> {
    if value.is_empty() {
        Err(RelayError::InvalidArgument(message))
    } else {
        Ok(())
    }
}
