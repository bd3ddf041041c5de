//! Room Broadcaster: fan-out of encoded frames to the members of a board room.
//!
//! Frames are encoded once and shared as `Arc<str>`. Every connection owns
//! one bounded outbox; a member whose outbox is full misses the frame and the
//! drop is counted. Delivery is best-effort and at-most-once, and only
//! members present at the moment of the broadcast see a frame.
//!
//! Fan-out within one room is serialized by the room's member lock; rooms do
//! not share locks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

/// Sending half of a connection's outbox.
pub type Outbox = mpsc::Sender<Arc<str>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_peers: usize,
}

#[derive(Default)]
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("room `{board_id}` is full ({capacity} peers)")]
    RoomFull { board_id: String, capacity: usize },
}

/// A connection present in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMember {
    pub connection_id: Uuid,
    pub user_id: String,
}

struct Member {
    user_id: String,
    outbox: Outbox,
}

/// Broadcast scope for one board.
pub struct Room {
    board_id: String,
    members: Mutex<HashMap<Uuid, Member>>,
    /// `None` = unbounded.
    capacity: Option<usize>,
    stats: AtomicBroadcastStats,
}

impl Room {
    pub fn new(board_id: impl Into<String>, capacity: Option<usize>) -> Self {
        Self {
            board_id: board_id.into(),
            members: Mutex::new(HashMap::new()),
            capacity,
            stats: AtomicBroadcastStats::default(),
        }
    }

    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    /// Returns `Ok(false)` when the connection is already a member.
    pub async fn join(
        &self,
        connection_id: Uuid,
        user_id: impl Into<String>,
        outbox: Outbox,
    ) -> Result<bool, JoinError> {
        let mut members = self.members.lock().await;
        if members.contains_key(&connection_id) {
            return Ok(false);
        }
        if let Some(capacity) = self.capacity {
            if members.len() >= capacity {
                return Err(JoinError::RoomFull {
                    board_id: self.board_id.clone(),
                    capacity,
                });
            }
        }
        members.insert(
            connection_id,
            Member {
                user_id: user_id.into(),
                outbox,
            },
        );
        Ok(true)
    }

    /// Returns `false` when the connection was not a member.
    pub async fn leave(&self, connection_id: Uuid) -> bool {
        self.members.lock().await.remove(&connection_id).is_some()
    }

    /// Deliver `frame` to every member except `exclude`. Returns how many
    /// outboxes accepted it.
    pub async fn broadcast(&self, frame: Arc<str>, exclude: Option<Uuid>) -> usize {
        let members = self.members.lock().await;
        let mut delivered = 0;
        for (connection_id, member) in members.iter() {
            if Some(*connection_id) == exclude {
                continue;
            }
            match member.outbox.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "Outbox of {} ({connection_id}) full in room {}; frame dropped",
                        member.user_id,
                        self.board_id
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Outbox of {connection_id} closed; frame dropped");
                }
            }
        }
        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        delivered
    }

    pub async fn members(&self) -> Vec<RoomMember> {
        self.members
            .lock()
            .await
            .iter()
            .map(|(connection_id, member)| RoomMember {
                connection_id: *connection_id,
                user_id: member.user_id.clone(),
            })
            .collect()
    }

    pub async fn member_count(&self) -> usize {
        self.members.lock().await.len()
    }

    pub async fn has_member(&self, connection_id: Uuid) -> bool {
        self.members.lock().await.contains_key(&connection_id)
    }

    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.stats.messages_dropped.load(Ordering::Relaxed),
            active_peers: self.member_count().await,
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

/// Maps board ids to rooms.
///
/// Rooms are created on first join and removed when the last member leaves.
/// Join and leave go through the room map's write lock so a room is never
/// dropped while a join into it is in flight.
pub struct Broadcaster {
    rooms: RwLock<HashMap<String, Arc<Room>>>,
    max_peers_per_room: Option<usize>,
}

impl Broadcaster {
    pub fn new(max_peers_per_room: Option<usize>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            max_peers_per_room,
        }
    }

    pub async fn get_or_create(&self, board_id: &str) -> Arc<Room> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(board_id) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(board_id.to_string())
            .or_insert_with(|| Arc::new(Room::new(board_id, self.max_peers_per_room)))
            .clone()
    }

    pub async fn get(&self, board_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(board_id).cloned()
    }

    pub async fn join(
        &self,
        board_id: &str,
        connection_id: Uuid,
        user_id: &str,
        outbox: Outbox,
    ) -> Result<bool, JoinError> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(board_id.to_string())
            .or_insert_with(|| Arc::new(Room::new(board_id, self.max_peers_per_room)))
            .clone();
        let joined = room.join(connection_id, user_id, outbox).await;
        if room.member_count().await == 0 {
            rooms.remove(board_id);
        }
        joined
    }

    /// Leave a room, dropping it once empty.
    pub async fn leave(&self, board_id: &str, connection_id: Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(board_id).cloned() else {
            return false;
        };
        let left = room.leave(connection_id).await;
        if room.member_count().await == 0 {
            rooms.remove(board_id);
            log::info!("Room {board_id} removed (empty)");
        }
        left
    }

    /// Broadcast into a room; a room nobody joined reaches nobody.
    pub async fn broadcast(&self, board_id: &str, frame: Arc<str>, exclude: Option<Uuid>) -> usize {
        match self.get(board_id).await {
            Some(room) => room.broadcast(frame, exclude).await,
            None => 0,
        }
    }

    pub async fn remove_if_empty(&self, board_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get(board_id) {
            if room.member_count().await == 0 {
                rooms.remove(board_id);
                return true;
            }
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_rooms(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rooms.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn max_peers_per_room(&self) -> Option<usize> {
        self.max_peers_per_room
    }
}
