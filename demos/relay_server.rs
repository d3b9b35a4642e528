//! Simple relay server over the in-memory store
//!
//! Run with: cargo run --example relay_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example relay_server                  # binds to 0.0.0.0:50051
//!   cargo run --example relay_server 127.0.0.1:7000   # custom address
//!
//! Talk to it with netcat — one JSON request per line:
//!
//!   $ nc localhost 50051
//!   {"op":"join_room","user_id":"alice","room_id":"weather"}
//!   {"op":"send_message","user_id":"alice","room_id":"weather","content":"hello"}
//!   {"op":"stream_messages","user_id":"alice","room_id":"weather"}
//!
//! A streaming connection receives every message published to the room plus a
//! keep-alive every 10 seconds (id "keep-alive", empty content).

use std::sync::Arc;

use room_relay::{MemoryStore, RelayServer, ServerConfig};

#[tokio::main]
async fn main() -> room_relay::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_relay=debug,relay_server=info".into()),
        )
        .init();

    let mut config = ServerConfig::default();
    if let Some(addr) = std::env::args().nth(1) {
        config = config.bind(addr.parse().expect("invalid bind address"));
    }

    let store = Arc::new(MemoryStore::new());
    let server = RelayServer::new(config, store);

    tracing::info!(addr = %server.bind_addr(), "starting relay server, ctrl-c to stop");

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
