//! Storage seam for the snapshot collaborator.
//!
//! The relay never owns board content; whoever serves snapshots does. The
//! trait is the boundary, [`MemoryBoardStore`] the in-process implementation
//! used by the server binary and tests. Access rules mirror the collaborator
//! surface: owners and members may read, only the owner may replace or
//! delete.

use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

use crate::Board;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("board `{0}` not found")]
    NotFound(String),
    #[error("user `{user}` may not access board `{board}`")]
    AccessDenied { board: String, user: String },
    #[error("board store lock poisoned")]
    Poisoned,
}

pub trait BoardStore: Send + Sync {
    fn get(&self, board_id: &str) -> Result<Board, StoreError>;

    fn list(&self) -> Result<Vec<Board>, StoreError>;

    /// Insert or replace by id.
    fn put(&self, board: Board) -> Result<(), StoreError>;

    fn delete(&self, board_id: &str) -> Result<Board, StoreError>;

    /// Boards the user owns or is a member of.
    fn list_for_user(&self, user_id: &str) -> Result<Vec<Board>, StoreError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|b| b.is_visible_to(user_id))
            .collect())
    }

    /// Fetch a board the user may see.
    fn get_visible(&self, board_id: &str, user_id: &str) -> Result<Board, StoreError> {
        let board = self.get(board_id)?;
        if !board.is_visible_to(user_id) {
            return Err(StoreError::AccessDenied {
                board: board_id.to_string(),
                user: user_id.to_string(),
            });
        }
        Ok(board)
    }

    /// Replace a board; only its owner may.
    fn put_owned(&self, board: Board, user_id: &str) -> Result<(), StoreError> {
        let current = self.get(&board.id)?;
        if current.owner_id != user_id {
            return Err(StoreError::AccessDenied {
                board: board.id,
                user: user_id.to_string(),
            });
        }
        self.put(board)
    }

    fn delete_owned(&self, board_id: &str, user_id: &str) -> Result<Board, StoreError> {
        let current = self.get(board_id)?;
        if current.owner_id != user_id {
            return Err(StoreError::AccessDenied {
                board: board_id.to_string(),
                user: user_id.to_string(),
            });
        }
        self.delete(board_id)
    }
}

#[derive(Debug, Default)]
pub struct MemoryBoardStore {
    boards: RwLock<HashMap<String, Board>>,
}

impl MemoryBoardStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_boards(boards: impl IntoIterator<Item = Board>) -> Self {
        let boards = boards.into_iter().map(|b| (b.id.clone(), b)).collect();
        Self {
            boards: RwLock::new(boards),
        }
    }

    pub fn len(&self) -> usize {
        self.boards.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BoardStore for MemoryBoardStore {
    fn get(&self, board_id: &str) -> Result<Board, StoreError> {
        let boards = self.boards.read().map_err(|_| StoreError::Poisoned)?;
        boards
            .get(board_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(board_id.to_string()))
    }

    fn list(&self) -> Result<Vec<Board>, StoreError> {
        let boards = self.boards.read().map_err(|_| StoreError::Poisoned)?;
        let mut all: Vec<Board> = boards.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    fn put(&self, board: Board) -> Result<(), StoreError> {
        let mut boards = self.boards.write().map_err(|_| StoreError::Poisoned)?;
        boards.insert(board.id.clone(), board);
        Ok(())
    }

    fn delete(&self, board_id: &str) -> Result<Board, StoreError> {
        let mut boards = self.boards.write().map_err(|_| StoreError::Poisoned)?;
        boards
            .remove(board_id)
            .ok_or_else(|| StoreError::NotFound(board_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::demo_board;
    use crate::IdGenerator;

    #[test]
    fn test_crud() {
        let store = MemoryBoardStore::new();
        assert!(store.is_empty());

        store.put(demo_board()).unwrap();
        assert_eq!(store.get("board-1").unwrap().title, "Project Alpha");
        assert_eq!(store.len(), 1);

        let mut renamed = demo_board();
        renamed.title = "Project Omega".into();
        store.put(renamed).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("board-1").unwrap().title, "Project Omega");

        assert_eq!(store.delete("board-1").unwrap().id, "board-1");
        assert_eq!(store.get("board-1"), Err(StoreError::NotFound("board-1".into())));
        assert!(store.delete("board-1").is_err());
    }

    #[test]
    fn test_list_for_user() {
        // Random ids cannot collide with the demo board's `board-1`.
        let ids = IdGenerator::random();
        let mut shared = Board::new(&ids, "Shared", "user-2");
        shared.add_member("user-1");
        let private = Board::new(&ids, "Private", "user-3");
        let store = MemoryBoardStore::with_boards([demo_board(), shared.clone(), private]);
        assert_eq!(store.len(), 3);

        let mut titles: Vec<String> = store
            .list_for_user("user-1")
            .unwrap()
            .into_iter()
            .map(|b| b.title)
            .collect();
        titles.sort();
        assert_eq!(titles, vec!["Project Alpha", "Shared"]);
        assert!(store.list_for_user("user-9").unwrap().is_empty());

        // Same id replaces; it does not add a fourth board.
        shared.title = "Shared (renamed)".into();
        store.put(shared.clone()).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.get(&shared.id).unwrap().title, "Shared (renamed)");
    }

    #[test]
    fn test_access_rules() {
        let mut board = demo_board();
        board.add_member("user-2");
        let store = MemoryBoardStore::with_boards([board]);

        assert!(store.get_visible("board-1", "user-2").is_ok());
        assert!(matches!(
            store.get_visible("board-1", "user-3"),
            Err(StoreError::AccessDenied { .. })
        ));

        // Members can read but not replace or delete.
        let mut edit = store.get("board-1").unwrap();
        edit.title = "Hijacked".into();
        assert!(store.put_owned(edit.clone(), "user-2").is_err());
        assert!(store.delete_owned("board-1", "user-2").is_err());

        store.put_owned(edit, "user-1").unwrap();
        assert_eq!(store.get("board-1").unwrap().title, "Hijacked");
        assert!(store.delete_owned("board-1", "user-1").is_ok());
    }
}
