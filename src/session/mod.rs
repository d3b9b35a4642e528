//! Stream sessions and the per-room broadcast bridge
//!
//! A [`StreamSession`] drives one long-lived outbound stream for a (user,
//! room) pair. The first session in a room spawns a [`RoomBridge`] that
//! consumes the room's external pub/sub channel and fans resolved messages
//! out through the registry; the bridge stops when the room loses its last
//! subscriber.

pub mod bridge;
pub mod state;
pub mod stream;

pub use bridge::RoomBridge;
pub use state::SessionState;
pub use stream::{MessageSink, StreamSession};
