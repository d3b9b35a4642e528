//! Room-based real-time message relay
//!
//! Clients join named rooms, publish short text messages, and receive a live
//! stream of messages for rooms they have joined. Membership, history, and
//! cross-process delivery are delegated to an external key-value/pub-sub
//! store behind the [`Store`] trait; this crate owns the in-process fan-out.
//!
//! # Delivery path
//!
//! ```text
//!   send_message ──► history write ──► publish(room channel)
//!                                            │
//!                                      [RoomBridge]   one per room with
//!                                            │        ≥1 open stream
//!                                            ▼
//!                                   registry.broadcast
//!                                   ┌────────┴────────┐
//!                                   ▼                 ▼
//!                            [StreamSession]   [StreamSession]
//!                               sink.send         sink.send
//!                                   │                 │
//!                                   ▼                 ▼
//!                                client A          client B
//! ```
//!
//! Every delivery goes through the room's single bridge, so a message reaches
//! each subscriber at most once even when publisher and subscribers share a
//! process. Slow consumers lose messages (bounded channel, drop-on-full)
//! rather than ever blocking the publisher.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use room_relay::{MemoryStore, RelayServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> room_relay::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     let server = RelayServer::new(ServerConfig::default(), store);
//!     server.run().await
//! }
//! ```

pub mod config;
pub mod error;
pub mod message;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod service;
pub mod session;
pub mod store;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use message::{Message, KEEP_ALIVE_ID};
pub use registry::{RoomRegistry, RoomStats};
pub use server::{RelayServer, ServerConfig};
pub use service::RelayService;
pub use session::{MessageSink, RoomBridge, StreamSession};
pub use store::{MemoryStore, Store};
