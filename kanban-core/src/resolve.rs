//! Order Position Resolver.
//!
//! Runs synchronously on the session that performs an edit. Each operation
//! takes the current board, builds the edited tree in one step, and returns
//! it together with the event peers need to reproduce the same tree. The
//! caller hands the result to [`Reconciler::commit_local`] and sends the
//! event.
//!
//! Dropping a card in its own column always sends it to the end of that
//! column; the drop index is not used. Cross-column moves append to the
//! target column.
//!
//! [`Reconciler::commit_local`]: crate::Reconciler::commit_local

use thiserror::Error;

use crate::event::{CardDeletePayload, CardPayload, ColumnDeletePayload, ColumnPayload};
use crate::ids::{EntityKind, IdGenerator};
use crate::{now_millis, Board, BoardEvent, Card, Column};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown card `{0}`")]
    UnknownCard(String),
    #[error("unknown column `{0}`")]
    UnknownColumn(String),
    #[error("title must not be empty")]
    EmptyTitle,
}

/// The tree after an optimistic edit, plus the event that reproduces it.
#[derive(Debug, Clone)]
pub struct LocalEdit {
    pub board: Board,
    pub event: BoardEvent,
}

#[derive(Debug, Default)]
pub struct OrderResolver {
    ids: IdGenerator,
}

impl OrderResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ids(ids: IdGenerator) -> Self {
        Self { ids }
    }

    /// Drop `card_id` on `column_id`.
    ///
    /// Returns `Ok(None)` when the card is already last in its own column:
    /// nothing changes and nothing is emitted.
    pub fn move_card(
        &self,
        board: &Board,
        card_id: &str,
        column_id: &str,
    ) -> Result<Option<LocalEdit>, ResolveError> {
        let target = board
            .column_index(column_id)
            .ok_or_else(|| ResolveError::UnknownColumn(column_id.to_string()))?;
        let (source, index) = board
            .locate_card(card_id)
            .ok_or_else(|| ResolveError::UnknownCard(card_id.to_string()))?;

        let source_len = board.columns[source].cards.len();
        if source == target && index + 1 == source_len {
            return Ok(None);
        }

        let mut next = board.clone();
        let mut card = next.columns[source].cards[index].clone();
        for column in &mut next.columns {
            let before = column.cards.len();
            column.cards.retain(|c| c.id != card_id);
            if column.cards.len() != before {
                column.renumber_cards();
            }
        }

        card.column_id = column_id.to_string();
        let column = &mut next.columns[target];
        column.cards.push(card);
        column.renumber_cards();
        let position = (column.cards.len() - 1) as u32;

        Ok(Some(LocalEdit {
            board: next,
            event: BoardEvent::card_move(card_id, column_id, position),
        }))
    }

    /// Append a new card with a fresh id to `column_id`.
    pub fn create_card(
        &self,
        board: &Board,
        column_id: &str,
        title: &str,
    ) -> Result<LocalEdit, ResolveError> {
        let title = non_empty(title)?;
        let target = board
            .column_index(column_id)
            .ok_or_else(|| ResolveError::UnknownColumn(column_id.to_string()))?;

        let mut next = board.clone();
        let column = &mut next.columns[target];
        let mut card = Card::new(self.ids.next(EntityKind::Card), column_id, title);
        card.position = column.cards.len() as u32;
        column.cards.push(card.clone());

        Ok(LocalEdit {
            board: next,
            event: BoardEvent::card_create(card),
        })
    }

    /// Replace a card's fields. Membership and position stay where they are.
    pub fn update_card(&self, board: &Board, card: Card) -> Result<LocalEdit, ResolveError> {
        let (ci, ki) = board
            .locate_card(&card.id)
            .ok_or_else(|| ResolveError::UnknownCard(card.id.clone()))?;

        let mut next = board.clone();
        let slot = &mut next.columns[ci].cards[ki];
        let mut card = card;
        card.column_id = slot.column_id.clone();
        card.position = slot.position;
        card.updated_at = now_millis();
        *slot = card.clone();

        Ok(LocalEdit {
            board: next,
            event: BoardEvent::CardUpdate(CardPayload { card }),
        })
    }

    pub fn delete_card(&self, board: &Board, card_id: &str) -> Result<LocalEdit, ResolveError> {
        if board.locate_card(card_id).is_none() {
            return Err(ResolveError::UnknownCard(card_id.to_string()));
        }

        let mut next = board.clone();
        for column in &mut next.columns {
            let before = column.cards.len();
            column.cards.retain(|c| c.id != card_id);
            if column.cards.len() != before {
                column.renumber_cards();
            }
        }

        Ok(LocalEdit {
            board: next,
            event: BoardEvent::CardDelete(CardDeletePayload {
                card_id: card_id.to_string(),
            }),
        })
    }

    /// Append an empty column at `position = columns.len()`.
    pub fn create_column(&self, board: &Board, title: &str) -> Result<LocalEdit, ResolveError> {
        let title = non_empty(title)?;
        let mut column = Column::new(self.ids.next(EntityKind::Column), &board.id, title);
        column.position = board.columns.len() as u32;

        let mut next = board.clone();
        next.columns.push(column.clone());

        Ok(LocalEdit {
            board: next,
            event: BoardEvent::ColumnCreate(ColumnPayload { column }),
        })
    }

    pub fn rename_column(
        &self,
        board: &Board,
        column_id: &str,
        title: &str,
    ) -> Result<LocalEdit, ResolveError> {
        let title = non_empty(title)?;
        let index = board
            .column_index(column_id)
            .ok_or_else(|| ResolveError::UnknownColumn(column_id.to_string()))?;

        let mut next = board.clone();
        next.columns[index].title = title.to_string();
        let column = next.columns[index].clone();

        Ok(LocalEdit {
            board: next,
            event: BoardEvent::ColumnUpdate(ColumnPayload { column }),
        })
    }

    /// Remove a column and every card it holds.
    pub fn delete_column(&self, board: &Board, column_id: &str) -> Result<LocalEdit, ResolveError> {
        let index = board
            .column_index(column_id)
            .ok_or_else(|| ResolveError::UnknownColumn(column_id.to_string()))?;

        let mut next = board.clone();
        next.columns.remove(index);
        next.renumber_columns();

        Ok(LocalEdit {
            board: next,
            event: BoardEvent::ColumnDelete(ColumnDeletePayload {
                column_id: column_id.to_string(),
            }),
        })
    }
}

fn non_empty(title: &str) -> Result<&str, ResolveError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ResolveError::EmptyTitle);
    }
    Ok(title)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::demo_board;
    use crate::event::CardMovePayload;
    use crate::{Applied, Reconciler};

    fn ids(board: &Board, column: &str) -> Vec<String> {
        board
            .column(column)
            .map(|c| c.cards.iter().map(|k| k.id.clone()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_same_column_drop_appends_to_end() {
        let resolver = OrderResolver::new();
        let board = demo_board();
        let edit = resolver.move_card(&board, "card-1", "col-1").unwrap().unwrap();

        assert_eq!(ids(&edit.board, "col-1"), vec!["card-2", "card-1"]);
        assert_eq!(edit.event, BoardEvent::card_move("card-1", "col-1", 1));
        // Source board untouched.
        assert_eq!(ids(&board, "col-1"), vec!["card-1", "card-2"]);
    }

    #[test]
    fn test_same_column_drop_on_last_card_is_noop() {
        let resolver = OrderResolver::new();
        let board = demo_board();
        assert!(resolver.move_card(&board, "card-2", "col-1").unwrap().is_none());
        assert!(resolver.move_card(&board, "card-3", "col-2").unwrap().is_none());
    }

    #[test]
    fn test_cross_column_move_appends() {
        let resolver = OrderResolver::new();
        let edit = resolver
            .move_card(&demo_board(), "card-1", "col-2")
            .unwrap()
            .unwrap();

        assert_eq!(ids(&edit.board, "col-1"), vec!["card-2"]);
        assert_eq!(ids(&edit.board, "col-2"), vec!["card-3", "card-1"]);
        let moved = edit.board.card("card-1").unwrap();
        assert_eq!(moved.column_id, "col-2");
        assert_eq!(moved.position, 1);
        assert_eq!(edit.board.card("card-2").unwrap().position, 0);

        match edit.event {
            BoardEvent::CardMove(CardMovePayload { ref column_id, position, .. }) => {
                assert_eq!(column_id, "col-2");
                assert_eq!(position, 1);
            }
            other => panic!("expected card:move, got {other:?}"),
        }
    }

    #[test]
    fn test_move_errors() {
        let resolver = OrderResolver::new();
        let board = demo_board();
        assert_eq!(
            resolver.move_card(&board, "card-1", "col-9").unwrap_err(),
            ResolveError::UnknownColumn("col-9".into())
        );
        assert_eq!(
            resolver.move_card(&board, "card-9", "col-1").unwrap_err(),
            ResolveError::UnknownCard("card-9".into())
        );
    }

    #[test]
    fn test_create_card_and_column() {
        let resolver = OrderResolver::new();
        let board = demo_board();

        let edit = resolver.create_card(&board, "col-2", "  Write tests ").unwrap();
        let created = edit.board.columns[1].cards.last().unwrap();
        assert!(created.id.starts_with("card-"));
        assert_eq!(created.title, "Write tests");
        assert_eq!(created.column_id, "col-2");
        assert_eq!(created.position, 1);
        assert_eq!(edit.event, BoardEvent::card_create(created.clone()));

        let edit = resolver.create_column(&edit.board, "Review").unwrap();
        let column = edit.board.columns.last().unwrap();
        assert!(column.id.starts_with("col-"));
        assert_eq!(column.position, 3);
        assert_eq!(column.board_id, "board-1");
        assert_eq!(edit.event.name(), "column:create");

        assert_eq!(
            resolver.create_column(&board, "   ").unwrap_err(),
            ResolveError::EmptyTitle
        );
    }

    #[test]
    fn test_update_card_keeps_place() {
        let resolver = OrderResolver::new();
        let board = demo_board();
        let mut card = board.card("card-2").unwrap().clone();
        card.title = "Design schema v2".into();
        card.column_id = "col-3".into();
        card.position = 7;

        let edit = resolver.update_card(&board, card).unwrap();
        let stored = edit.board.card("card-2").unwrap();
        assert_eq!(stored.title, "Design schema v2");
        assert_eq!(stored.column_id, "col-1");
        assert_eq!(stored.position, 1);
    }

    #[test]
    fn test_delete_column_drops_its_cards() {
        let resolver = OrderResolver::new();
        let edit = resolver.delete_column(&demo_board(), "col-2").unwrap();
        assert!(edit.board.card("card-3").is_none());
        let positions: Vec<u32> = edit.board.columns.iter().map(|c| c.position).collect();
        assert_eq!(positions, vec![0, 1]);
    }

    /// A peer applying the emitted event ends up with the same tree.
    #[test]
    fn test_peer_reproduces_every_local_edit() {
        let resolver = OrderResolver::new();
        let mut local = Reconciler::new(demo_board());
        let mut peer = Reconciler::new(local.board().clone());

        let steps: Vec<Box<dyn Fn(&Board) -> LocalEdit>> = vec![
            Box::new(|b| resolver.move_card(b, "card-1", "col-2").unwrap().unwrap()),
            Box::new(|b| resolver.move_card(b, "card-3", "col-2").unwrap().unwrap()),
            Box::new(|b| resolver.create_card(b, "col-3", "Ship it").unwrap()),
            Box::new(|b| resolver.create_column(b, "Blocked").unwrap()),
            Box::new(|b| resolver.rename_column(b, "col-1", "Backlog").unwrap()),
            Box::new(|b| {
                let mut card = b.card("card-4").unwrap().clone();
                card.description = Some("done and dusted".into());
                resolver.update_card(b, card).unwrap()
            }),
            Box::new(|b| resolver.delete_card(b, "card-2").unwrap()),
            Box::new(|b| resolver.delete_column(b, "col-3").unwrap()),
        ];

        for step in &steps {
            let edit = step(local.board());
            let event = local.commit_local(edit);
            assert_eq!(peer.apply(&event), Applied::Changed, "{}", event.name());
            assert_eq!(*peer.snapshot(), *local.snapshot(), "diverged after {}", event.name());
        }
    }
}
