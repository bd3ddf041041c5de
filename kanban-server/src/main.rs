//! Kanban relay server.
//!
//! Configured from the environment:
//!
//! - `KANBAN_BIND_ADDR` (default `127.0.0.1:9090`)
//! - `KANBAN_MAX_PEERS_PER_ROOM` (default 100, 0 for no limit)
//! - `KANBAN_OUTBOX_CAPACITY` (default 256)
//! - `KANBAN_TOKENS`: `token=userId:name[,token=userId:name…]`
//!
//! Logging follows `RUST_LOG`.

use std::str::FromStr;
use std::sync::Arc;

use log::{info, warn};

use kanban_collab::server::{RelayServer, ServerConfig};
use kanban_collab::session::{Identity, StaticTokenVerifier};
use kanban_core::demo::demo_board;
use kanban_core::MemoryBoardStore;

const DEMO_TOKEN: &str = "demo-token";

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring unparseable {key}={raw}");
            default
        }),
        Err(_) => default,
    }
}

/// Parse `token=userId:name` entries. Malformed entries are skipped.
fn parse_tokens(raw: &str) -> StaticTokenVerifier {
    let mut verifier = StaticTokenVerifier::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let parsed = entry.split_once('=').and_then(|(token, who)| {
            let (user_id, name) = who.split_once(':').unwrap_or((who, who));
            (!token.is_empty() && !user_id.is_empty()).then(|| (token, user_id, name))
        });
        match parsed {
            Some((token, user_id, name)) => {
                verifier.insert(token, Identity::new(user_id, name, ""));
            }
            None => warn!("Skipping malformed token entry `{entry}`"),
        }
    }
    verifier
}

fn config_from_env() -> ServerConfig {
    let defaults = ServerConfig::default();
    ServerConfig {
        bind_addr: env_or("KANBAN_BIND_ADDR", defaults.bind_addr),
        max_peers_per_room: env_or("KANBAN_MAX_PEERS_PER_ROOM", defaults.max_peers_per_room),
        outbox_capacity: env_or("KANBAN_OUTBOX_CAPACITY", defaults.outbox_capacity),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    let config = config_from_env();
    let mut verifier = parse_tokens(&std::env::var("KANBAN_TOKENS").unwrap_or_default());
    if verifier.is_empty() {
        warn!("KANBAN_TOKENS not set; accepting `{DEMO_TOKEN}` for user-1");
        verifier.insert(DEMO_TOKEN, Identity::new("user-1", "Demo User", "demo@example.com"));
    }

    let board = demo_board();
    info!("Serving demo board {} ({})", board.id, board.title);
    let store = Arc::new(MemoryBoardStore::with_boards([board]));

    info!(
        "Starting kanban relay on {} ({} credentials)",
        config.bind_addr,
        verifier.len()
    );
    RelayServer::new(config, Arc::new(verifier))
        .with_store(store)
        .run()
        .await
}
