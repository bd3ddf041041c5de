//! # kanban-collab — real-time relay for kanban boards
//!
//! Sessions connect over WebSocket with a bearer credential, join board
//! rooms, and exchange board events as JSON text frames. The relay holds no
//! board state of its own: it authenticates, stamps identities on presence
//! events, and fans each event out to the other members of the room.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   WebSocket (JSON)  ┌──────────────┐
//! │ SyncClient   │ ◄─────────────────► │ RelayServer  │
//! │ BoardReplica │                     │              │
//! └──────┬───────┘                     └──────┬───────┘
//!        │                                    │
//!        ▼                                    ▼
//! ┌──────────────┐                     ┌──────────────┐
//! │ Reconciler   │                     │ Session      │
//! │ (local tree) │                     │ Registry     │
//! └──────────────┘                     └──────┬───────┘
//!                                             │
//!                                     ┌───────┴───────┐
//!                                     │ Broadcaster   │
//!                                     │ (rooms)       │
//!                                     └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — client and server frames
//! - [`session`] — credential checks and per-connection room membership
//! - [`broadcast`] — board rooms with bounded per-peer outboxes
//! - [`server`] — the WebSocket relay
//! - [`client`] — WebSocket client
//! - [`presence`] — remote users, cursors and typing indicators
//! - [`replica`] — one session's optimistic view of a board

pub mod protocol;
pub mod session;
pub mod broadcast;
pub mod server;
pub mod client;
pub mod presence;
pub mod replica;

pub use protocol::{ClientFrame, ProtocolError, ServerFrame, SERVER_ORIGIN};
pub use session::{
    AuthError, CredentialVerifier, Departure, Identity, SessionRegistry, StaticTokenVerifier,
};
pub use broadcast::{BroadcastStats, Broadcaster, JoinError, Room, RoomMember};
pub use server::{RelayHandle, RelayServer, ServerConfig, ServerStats};
pub use client::{ConnectionState, SyncClient, SyncEvent};
pub use presence::{user_color, PresenceRoster};
pub use replica::{BoardReplica, ReplicaError};
