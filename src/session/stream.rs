//! Stream session driver
//!
//! One `StreamSession` runs per open stream call: it verifies membership,
//! registers with the room registry (spawning the room's bridge if it is the
//! first subscriber), then forwards messages and keep-alives into the client
//! sink until a stop trigger fires.
//!
//! Stop triggers: upstream cancellation (client disconnect), channel
//! retirement (replaced registration or leave-room), a sink write failure, or
//! the safety-net duration bound. Whichever fires first wins the
//! `begin_drain` transition; cleanup runs exactly once.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::bridge::RoomBridge;
use super::state::SessionState;
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::message::Message;
use crate::registry::RoomRegistry;
use crate::store::{keys, Store};

/// Outbound transport for one stream
///
/// Implemented by the TCP connection writer; tests use channel-backed
/// collectors. A send error terminates the session — retry is the client's
/// concern.
#[async_trait]
pub trait MessageSink: Send {
    async fn send(&mut self, message: &Message) -> io::Result<()>;
}

/// Driver for one (user, room) stream
pub struct StreamSession {
    store: Arc<dyn Store>,
    registry: Arc<RoomRegistry>,
    config: RelayConfig,
    user_id: String,
    room_id: String,
}

impl StreamSession {
    /// Create a session for an open stream call
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<RoomRegistry>,
        config: RelayConfig,
        user_id: impl Into<String>,
        room_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            user_id: user_id.into(),
            room_id: room_id.into(),
        }
    }

    /// Run the session to completion
    ///
    /// Returns when the stream ends for any reason; the registry entry is
    /// released before returning. Sink errors are surfaced as
    /// [`RelayError::Transport`].
    pub async fn run<S>(&self, sink: &mut S, cancel: CancellationToken) -> Result<()>
    where
        S: MessageSink + ?Sized,
    {
        let mut state = SessionState::Joining;

        let member = self
            .store
            .set_contains(&keys::room_members(&self.room_id), &self.user_id)
            .await?;
        if !member {
            return Err(RelayError::PermissionDenied {
                user_id: self.user_id.clone(),
                room_id: self.room_id.clone(),
            });
        }

        let mut registration = self.registry.register(&self.room_id, &self.user_id).await;
        if registration.first_in_room {
            RoomBridge::spawn(
                Arc::clone(&self.store),
                Arc::clone(&self.registry),
                self.room_id.clone(),
                registration.room_token.clone(),
            );
        }

        state.start_streaming();
        tracing::debug!(room = %self.room_id, user = %self.user_id, "stream session streaming");

        let result = self
            .stream_loop(&mut registration.receiver, sink, &cancel)
            .await;

        if state.begin_drain() {
            self.registry
                .unregister(&self.room_id, &self.user_id, registration.epoch)
                .await;
            state.close();
        }

        tracing::debug!(
            room = %self.room_id,
            user = %self.user_id,
            ok = result.is_ok(),
            "stream session closed"
        );
        result
    }

    async fn stream_loop<S>(
        &self,
        receiver: &mut mpsc::Receiver<Message>,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        S: MessageSink + ?Sized,
    {
        // First action on entering Streaming: one immediate keep-alive so the
        // client can detect liveness before any real traffic.
        self.send_keep_alive(sink).await?;

        let period = self.config.keep_alive_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let deadline = tokio::time::sleep(self.config.max_stream_duration);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!(room = %self.room_id, user = %self.user_id, "stream cancelled by client");
                    return Ok(());
                }
                () = &mut deadline => {
                    tracing::warn!(
                        room = %self.room_id,
                        user = %self.user_id,
                        "stream reached safety-net duration bound, closing"
                    );
                    return Ok(());
                }
                next = receiver.recv() => match next {
                    Some(message) => {
                        sink.send(&message).await.map_err(RelayError::Transport)?;
                    }
                    // Channel retired: replaced registration or leave-room
                    None => {
                        tracing::debug!(room = %self.room_id, user = %self.user_id, "outbound channel retired");
                        return Ok(());
                    }
                },
                _ = ticker.tick() => {
                    self.send_keep_alive(sink).await?;
                }
            }
        }
    }

    async fn send_keep_alive<S>(&self, sink: &mut S) -> Result<()>
    where
        S: MessageSink + ?Sized,
    {
        let keep_alive = Message::keep_alive(self.user_id.as_str(), self.room_id.as_str());
        sink.send(&keep_alive).await.map_err(RelayError::Transport)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_test::assert_ok;

    use super::*;
    use crate::store::MemoryStore;

    struct CollectorSink {
        tx: mpsc::UnboundedSender<Message>,
    }

    #[async_trait]
    impl MessageSink for CollectorSink {
        async fn send(&mut self, message: &Message) -> io::Result<()> {
            self.tx
                .send(message.clone())
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "collector gone"))
        }
    }

    /// Sink that fails every write
    struct BrokenSink;

    #[async_trait]
    impl MessageSink for BrokenSink {
        async fn send(&mut self, _message: &Message) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"))
        }
    }

    async fn member_store(user_id: &str, room_id: &str) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .set_add(&keys::room_members(room_id), user_id)
            .await
            .unwrap();
        store
    }

    fn session(
        store: &Arc<MemoryStore>,
        registry: &Arc<RoomRegistry>,
        config: RelayConfig,
        user_id: &str,
        room_id: &str,
    ) -> StreamSession {
        StreamSession::new(
            store.clone() as Arc<dyn Store>,
            registry.clone(),
            config,
            user_id,
            room_id,
        )
    }

    #[tokio::test]
    async fn test_rejects_non_member() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(RoomRegistry::new());
        let session = session(&store, &registry, RelayConfig::default(), "alice", "weather");

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut sink = CollectorSink { tx };
        let err = session
            .run(&mut sink, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::PermissionDenied { .. }));
        assert_eq!(registry.subscriber_count("weather").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_then_periodic_keep_alives() {
        let store = member_store("alice", "weather").await;
        let registry = Arc::new(RoomRegistry::new());
        let session = session(&store, &registry, RelayConfig::default(), "alice", "weather");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut sink = CollectorSink { tx };
                session.run(&mut sink, cancel).await
            })
        };

        for _ in 0..3 {
            let message = rx.recv().await.unwrap();
            assert!(message.is_keep_alive());
            assert!(message.content.is_empty());
            assert_eq!(message.user_id, "alice");
            assert_eq!(message.room_id, "weather");
        }

        cancel.cancel();
        assert_ok!(handle.await.unwrap());
        assert_eq!(registry.subscriber_count("weather").await, 0);
    }

    #[tokio::test]
    async fn test_forwards_broadcast_messages() {
        let store = member_store("alice", "weather").await;
        let registry = Arc::new(RoomRegistry::new());
        let session = session(&store, &registry, RelayConfig::default(), "alice", "weather");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut sink = CollectorSink { tx };
                session.run(&mut sink, cancel).await
            })
        };

        // Initial keep-alive arrives first
        let first = rx.recv().await.unwrap();
        assert!(first.is_keep_alive());

        let sent = Message::new("bob", "weather", "hello");
        registry.broadcast("weather", &sent).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received, sent);

        cancel.cancel();
        assert_ok!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_sink_error_terminates_with_cleanup() {
        let store = member_store("alice", "weather").await;
        let registry = Arc::new(RoomRegistry::new());
        let session = session(&store, &registry, RelayConfig::default(), "alice", "weather");

        let err = session
            .run(&mut BrokenSink, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Transport(_)));
        assert_eq!(registry.subscriber_count("weather").await, 0);
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_leave_room_retires_running_session() {
        let store = member_store("alice", "weather").await;
        let registry = Arc::new(RoomRegistry::new());
        let session = session(&store, &registry, RelayConfig::default(), "alice", "weather");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            let mut sink = CollectorSink { tx };
            session.run(&mut sink, CancellationToken::new()).await
        });

        // Wait until the session is registered
        assert!(rx.recv().await.unwrap().is_keep_alive());

        registry.remove_subscriber("weather", "alice").await;
        assert_ok!(handle.await.unwrap());
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_replacement_ends_prior_session() {
        let store = member_store("alice", "weather").await;
        let registry = Arc::new(RoomRegistry::new());

        let first = session(&store, &registry, RelayConfig::default(), "alice", "weather");
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let handle1 = tokio::spawn(async move {
            let mut sink = CollectorSink { tx: tx1 };
            first.run(&mut sink, CancellationToken::new()).await
        });
        assert!(rx1.recv().await.unwrap().is_keep_alive());

        // Reconnect: the replacement registration retires the first channel
        let second = session(&store, &registry, RelayConfig::default(), "alice", "weather");
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let cancel2 = CancellationToken::new();
        let handle2 = {
            let cancel2 = cancel2.clone();
            tokio::spawn(async move {
                let mut sink = CollectorSink { tx: tx2 };
                second.run(&mut sink, cancel2).await
            })
        };

        // The first session ends cleanly, not with an error
        assert_ok!(handle1.await.unwrap());

        assert!(rx2.recv().await.unwrap().is_keep_alive());
        let sent = Message::new("bob", "weather", "for the new stream");
        registry.broadcast("weather", &sent).await;
        assert_eq!(rx2.recv().await.unwrap(), sent);

        // Exactly one registration remains
        assert_eq!(registry.subscriber_count("weather").await, 1);

        cancel2.cancel();
        assert_ok!(handle2.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_safety_net_deadline_closes_stream() {
        let store = member_store("alice", "weather").await;
        let registry = Arc::new(RoomRegistry::new());
        let config = RelayConfig::default()
            .keep_alive_interval(Duration::from_secs(10))
            .max_stream_duration(Duration::from_secs(35));
        let session = session(&store, &registry, config, "alice", "weather");

        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            let mut sink = CollectorSink { tx };
            session.run(&mut sink, CancellationToken::new()).await
        });

        // Never cancelled; the bound alone ends the session
        assert_ok!(handle.await.unwrap());
        assert_eq!(registry.subscriber_count("weather").await, 0);
    }
}
