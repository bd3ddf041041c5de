//! One session's view of one board.
//!
//! Ties the resolver, the reconciler and the presence roster together: local
//! actions are resolved and committed optimistically and come back as frames
//! ready to send, remote events are routed to the roster or the tree.

use std::sync::Arc;

use kanban_core::event::{JoinPayload, LeavePayload};
use kanban_core::{
    Applied, Board, BoardEvent, Card, OrderResolver, Reconciler, ReconcilerConfig, ResolveError, User,
};
use thiserror::Error;

use crate::presence::PresenceRoster;
use crate::protocol::{ClientFrame, ProtocolError};

#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub struct BoardReplica {
    board_id: String,
    reconciler: Reconciler,
    resolver: OrderResolver,
    presence: PresenceRoster,
}

impl BoardReplica {
    pub fn new(board: Board, local: User) -> Self {
        Self::with_config(board, local, ReconcilerConfig::default())
    }

    pub fn with_config(board: Board, local: User, config: ReconcilerConfig) -> Self {
        Self {
            board_id: board.id.clone(),
            reconciler: Reconciler::with_config(board, config),
            resolver: OrderResolver::new(),
            presence: PresenceRoster::new(local),
        }
    }

    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    pub fn snapshot(&self) -> Arc<Board> {
        self.reconciler.snapshot()
    }

    pub fn board(&self) -> &Board {
        self.reconciler.board()
    }

    pub fn version(&self) -> u64 {
        self.reconciler.version()
    }

    pub fn presence(&self) -> &PresenceRoster {
        &self.presence
    }

    pub fn presence_mut(&mut self) -> &mut PresenceRoster {
        &mut self.presence
    }

    /// Replace the tree with a freshly fetched snapshot, e.g. after a
    /// reconnect.
    pub fn resync(&mut self, board: Board) {
        self.reconciler.reset(board);
    }

    pub fn join_frame(&self) -> Result<ClientFrame, ProtocolError> {
        let event = BoardEvent::BoardJoin(JoinPayload {
            board_id: self.board_id.clone(),
            user: self.presence.local_user().clone(),
        });
        ClientFrame::new(&event, None)
    }

    pub fn leave_frame(&mut self) -> Result<ClientFrame, ProtocolError> {
        self.presence.clear();
        let event = BoardEvent::BoardLeave(LeavePayload {
            board_id: self.board_id.clone(),
            user_id: self.presence.local_user().id.clone(),
        });
        ClientFrame::new(&event, None)
    }

    /// Drop a card on a column. `None` when the drop changes nothing.
    pub fn move_card(&mut self, card_id: &str, column_id: &str) -> Result<Option<ClientFrame>, ReplicaError> {
        match self.resolver.move_card(self.reconciler.board(), card_id, column_id)? {
            Some(edit) => self.commit(edit).map(Some),
            None => Ok(None),
        }
    }

    pub fn create_card(&mut self, column_id: &str, title: &str) -> Result<ClientFrame, ReplicaError> {
        let edit = self.resolver.create_card(self.reconciler.board(), column_id, title)?;
        self.commit(edit)
    }

    pub fn update_card(&mut self, card: Card) -> Result<ClientFrame, ReplicaError> {
        let edit = self.resolver.update_card(self.reconciler.board(), card)?;
        self.commit(edit)
    }

    pub fn delete_card(&mut self, card_id: &str) -> Result<ClientFrame, ReplicaError> {
        let edit = self.resolver.delete_card(self.reconciler.board(), card_id)?;
        self.commit(edit)
    }

    pub fn create_column(&mut self, title: &str) -> Result<ClientFrame, ReplicaError> {
        let edit = self.resolver.create_column(self.reconciler.board(), title)?;
        self.commit(edit)
    }

    pub fn rename_column(&mut self, column_id: &str, title: &str) -> Result<ClientFrame, ReplicaError> {
        let edit = self.resolver.rename_column(self.reconciler.board(), column_id, title)?;
        self.commit(edit)
    }

    pub fn delete_column(&mut self, column_id: &str) -> Result<ClientFrame, ReplicaError> {
        let edit = self.resolver.delete_column(self.reconciler.board(), column_id)?;
        self.commit(edit)
    }

    /// Cursor frame for the local pointer, `None` while rate-limited.
    pub fn cursor(&mut self, x: f64, y: f64) -> Result<Option<ClientFrame>, ProtocolError> {
        match self.presence.update_local_cursor(x, y) {
            Some(event) => ClientFrame::new(&event, Some(&self.board_id)).map(Some),
            None => Ok(None),
        }
    }

    pub fn start_typing(&self, card_id: &str) -> Result<ClientFrame, ProtocolError> {
        ClientFrame::new(&self.presence.start_typing(card_id), Some(&self.board_id))
    }

    pub fn stop_typing(&self, card_id: &str) -> Result<ClientFrame, ProtocolError> {
        ClientFrame::new(&self.presence.stop_typing(card_id), Some(&self.board_id))
    }

    /// Apply an event relayed for `board_id`. Events for other boards are
    /// ignored and yield `None`.
    pub fn apply_remote(&mut self, board_id: &str, event: &BoardEvent) -> Option<Applied> {
        if board_id != self.board_id {
            return None;
        }
        if event.is_presence() {
            self.presence.handle(event);
            return Some(Applied::Presence);
        }
        Some(self.reconciler.apply(event))
    }

    // Encode before publishing so a failed encode leaves the tree as it was.
    fn commit(&mut self, edit: kanban_core::LocalEdit) -> Result<ClientFrame, ReplicaError> {
        let frame = ClientFrame::new(&edit.event, Some(&self.board_id))?;
        self.reconciler.commit_local(edit);
        Ok(frame)
    }
}
