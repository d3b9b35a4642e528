//! Room subscription registry
//!
//! The in-process directory of active outbound channels, keyed by room then
//! user. Each open stream registers exactly one bounded channel; publishing
//! fans out through [`RoomRegistry::broadcast`] without ever blocking on a
//! slow consumer.
//!
//! # Architecture
//!
//! ```text
//!                        Arc<RoomRegistry>
//!                 ┌────────────────────────────┐
//!                 │ rooms: HashMap<RoomId,     │
//!                 │   RoomEntry {              │
//!                 │     user -> mpsc::Sender,  │
//!                 │     bridge CancellationToken │
//!                 │   }                        │
//!                 │ >                          │
//!                 └─────────────┬──────────────┘
//!                               │
//!          ┌────────────────────┼────────────────────┐
//!          │                    │                    │
//!          ▼                    ▼                    ▼
//!     [RoomBridge]        [StreamSession]      [StreamSession]
//!     pub/sub recv        receiver.recv()      receiver.recv()
//!          │                    │                    │
//!          └─► registry.broadcast() ─► sink.send() ─► client
//! ```
//!
//! Lifecycle invariants:
//!
//! - At most one live channel per (room, user); a re-registration retires the
//!   prior sender under the lock, and the retired session's stale epoch can
//!   never remove its replacement.
//! - The room entry (and the bridge token it owns) exists exactly while the
//!   room has ≥ 1 subscriber.

pub mod entry;
pub mod rooms;

pub use entry::FanOut;
pub use rooms::{Registration, RoomRegistry, RoomStats};
