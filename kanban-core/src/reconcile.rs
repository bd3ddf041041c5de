//! Client State Reconciler.
//!
//! Holds one session's copy of the board and applies events to it. Every
//! change builds a new tree and swaps the published `Arc<Board>`, so readers
//! holding an older snapshot never observe a mutation. Because the new tree
//! is only published on success, a dropped event leaves no trace even when
//! the algorithm had already started editing the copy.
//!
//! Conflicts are last-write-wins in arrival order: two moves of one card are
//! applied one after the other and the later one decides where the card ends.

use std::sync::Arc;
use thiserror::Error;

use crate::event::{BoardEvent, CardMovePayload};
use crate::resolve::LocalEdit;
use crate::{Board, Card, Column};

/// Tuning for how events are applied.
#[derive(Debug, Clone, Default)]
pub struct ReconcilerConfig {
    /// Treat `card:create` / `column:create` for an id that already exists as
    /// an update instead of appending a second entry.
    ///
    /// Off by default: replaying a create appends a duplicate, which is the
    /// established behavior peers rely on for now.
    pub upsert_creates: bool,
}

/// Why an event left the tree unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DropReason {
    #[error("unknown column `{0}`")]
    UnknownColumn(String),
    #[error("unknown card `{0}`")]
    UnknownCard(String),
    #[error("column `{column}` belongs to board `{board}`")]
    ForeignBoard { column: String, board: String },
    #[error("card `{0}` already lives in another column")]
    CardConflict(String),
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// A new snapshot was published.
    Changed,
    /// Presence event; the board tree is untouched.
    Presence,
    Dropped(DropReason),
}

pub struct Reconciler {
    snapshot: Arc<Board>,
    version: u64,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(board: Board) -> Self {
        Self::with_config(board, ReconcilerConfig::default())
    }

    pub fn with_config(board: Board, config: ReconcilerConfig) -> Self {
        Self {
            snapshot: Arc::new(board),
            version: 0,
            config,
        }
    }

    /// Current published snapshot.
    pub fn snapshot(&self) -> Arc<Board> {
        self.snapshot.clone()
    }

    pub fn board(&self) -> &Board {
        &self.snapshot
    }

    /// Number of changes published since construction.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Replace the local tree with a freshly fetched snapshot.
    pub fn reset(&mut self, board: Board) {
        self.publish(board);
    }

    /// Publish the tree of an optimistic local edit and hand back the event
    /// to emit. The edit is not re-applied.
    pub fn commit_local(&mut self, edit: LocalEdit) -> BoardEvent {
        self.publish(edit.board);
        edit.event
    }

    pub fn apply(&mut self, event: &BoardEvent) -> Applied {
        let outcome = match event {
            BoardEvent::BoardJoin(_)
            | BoardEvent::BoardLeave(_)
            | BoardEvent::CursorMove(_)
            | BoardEvent::UserTyping(_)
            | BoardEvent::UserStopTyping(_) => return Applied::Presence,
            BoardEvent::BoardUpdate(p) => Ok(p.board.clone()),
            BoardEvent::CardCreate(p) => self.edit(|b| create_card(b, &p.card, &self.config)),
            BoardEvent::CardUpdate(p) => self.edit(|b| update_card(b, &p.card)),
            BoardEvent::CardDelete(p) => self.edit(|b| delete_card(b, &p.card_id)),
            BoardEvent::CardMove(p) => self.edit(|b| move_card(b, p)),
            BoardEvent::ColumnCreate(p) => self.edit(|b| create_column(b, &p.column, &self.config)),
            BoardEvent::ColumnUpdate(p) => self.edit(|b| update_column(b, &p.column)),
            BoardEvent::ColumnDelete(p) => self.edit(|b| delete_column(b, &p.column_id)),
        };

        match outcome {
            Ok(next) => {
                self.publish(next);
                Applied::Changed
            }
            Err(reason) => {
                log::debug!("Dropped {} on board {}: {reason}", event.name(), self.snapshot.id);
                Applied::Dropped(reason)
            }
        }
    }

    /// Run `change` on a private copy of the current tree.
    fn edit(&self, change: impl FnOnce(&mut Board) -> Result<(), DropReason>) -> Result<Board, DropReason> {
        let mut next = Board::clone(&self.snapshot);
        change(&mut next)?;
        Ok(next)
    }

    fn publish(&mut self, board: Board) {
        self.snapshot = Arc::new(board);
        self.version += 1;
    }
}

fn create_card(board: &mut Board, card: &Card, config: &ReconcilerConfig) -> Result<(), DropReason> {
    if config.upsert_creates && board.locate_card(&card.id).is_some() {
        return update_card(board, card);
    }
    let index = board
        .column_index(&card.column_id)
        .ok_or_else(|| DropReason::UnknownColumn(card.column_id.clone()))?;
    // A replayed create may repeat the card in its own column, never elsewhere.
    if let Some((home, _)) = board.locate_card(&card.id) {
        if home != index {
            return Err(DropReason::CardConflict(card.id.clone()));
        }
    }
    let column = &mut board.columns[index];
    column.cards.push(card.clone());
    column.renumber_cards();
    Ok(())
}

/// Wholesale replace of every entry with the card's id. The card stays in the
/// column that holds it; membership only changes through a move.
fn update_card(board: &mut Board, card: &Card) -> Result<(), DropReason> {
    let mut found = false;
    for column in &mut board.columns {
        for slot in column.cards.iter_mut().filter(|c| c.id == card.id) {
            let position = slot.position;
            *slot = card.clone();
            slot.column_id = column.id.clone();
            slot.position = position;
            found = true;
        }
    }
    if !found {
        return Err(DropReason::UnknownCard(card.id.clone()));
    }
    Ok(())
}

fn delete_card(board: &mut Board, card_id: &str) -> Result<(), DropReason> {
    let mut found = false;
    for column in &mut board.columns {
        let before = column.cards.len();
        column.cards.retain(|c| c.id != card_id);
        if column.cards.len() != before {
            column.renumber_cards();
            found = true;
        }
    }
    if !found {
        return Err(DropReason::UnknownCard(card_id.to_string()));
    }
    Ok(())
}

/// Filter the card out of every column, then splice it into the target at
/// the requested index (clamped to the target's length).
fn move_card(board: &mut Board, mv: &CardMovePayload) -> Result<(), DropReason> {
    let target = board
        .column_index(&mv.column_id)
        .ok_or_else(|| DropReason::UnknownColumn(mv.column_id.clone()))?;

    let mut moving: Option<Card> = None;
    for column in &mut board.columns {
        let before = column.cards.len();
        column.cards.retain(|card| {
            if card.id == mv.card_id {
                moving = Some(card.clone());
                false
            } else {
                true
            }
        });
        if column.cards.len() != before {
            column.renumber_cards();
        }
    }

    let mut card = moving.ok_or_else(|| DropReason::UnknownCard(mv.card_id.clone()))?;
    card.column_id = mv.column_id.clone();

    let column = &mut board.columns[target];
    let index = (mv.position as usize).min(column.cards.len());
    column.cards.insert(index, card);
    column.renumber_cards();
    Ok(())
}

fn create_column(board: &mut Board, column: &Column, config: &ReconcilerConfig) -> Result<(), DropReason> {
    if column.board_id != board.id {
        return Err(DropReason::ForeignBoard {
            column: column.id.clone(),
            board: column.board_id.clone(),
        });
    }
    if config.upsert_creates && board.column_index(&column.id).is_some() {
        return update_column(board, column);
    }
    if let Some(card) = column.cards.iter().find(|c| board.locate_card(&c.id).is_some()) {
        return Err(DropReason::CardConflict(card.id.clone()));
    }

    let mut column = column.clone();
    column.renumber_cards();
    board.columns.push(column);
    board.renumber_columns();
    Ok(())
}

/// Columns carry their own cards, which are synchronized separately, so an
/// update only replaces the column's own fields.
fn update_column(board: &mut Board, column: &Column) -> Result<(), DropReason> {
    let slot = board
        .columns
        .iter_mut()
        .find(|c| c.id == column.id)
        .ok_or_else(|| DropReason::UnknownColumn(column.id.clone()))?;
    slot.title = column.title.clone();
    Ok(())
}

fn delete_column(board: &mut Board, column_id: &str) -> Result<(), DropReason> {
    let index = board
        .column_index(column_id)
        .ok_or_else(|| DropReason::UnknownColumn(column_id.to_string()))?;
    board.columns.remove(index);
    board.renumber_columns();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::demo_board;
    use crate::event::{CardDeletePayload, CardPayload, ColumnDeletePayload, ColumnPayload};
    use std::collections::HashMap;

    /// Every card id sits in exactly one column.
    fn assert_membership(board: &Board) {
        let mut homes: HashMap<&str, Vec<&str>> = HashMap::new();
        for column in &board.columns {
            for card in &column.cards {
                let entry = homes.entry(card.id.as_str()).or_default();
                if !entry.contains(&column.id.as_str()) {
                    entry.push(column.id.as_str());
                }
                assert_eq!(card.column_id, column.id, "card {} has stale columnId", card.id);
            }
        }
        for (card, columns) in homes {
            assert_eq!(columns.len(), 1, "card {card} in columns {columns:?}");
        }
    }

    fn ids(board: &Board, column: &str) -> Vec<String> {
        board
            .column(column)
            .map(|c| c.cards.iter().map(|k| k.id.clone()).collect())
            .unwrap_or_default()
    }

    fn new_card(id: &str, column: &str) -> BoardEvent {
        BoardEvent::card_create(Card::new(id, column, format!("Card {id}")))
    }

    #[test]
    fn test_create_appends_to_tail() {
        let mut r = Reconciler::new(demo_board());
        assert_eq!(r.apply(&new_card("card-5", "col-1")), Applied::Changed);

        assert_eq!(ids(r.board(), "col-1"), vec!["card-1", "card-2", "card-5"]);
        assert_eq!(r.board().card("card-5").unwrap().position, 2);
        assert_eq!(r.version(), 1);
    }

    #[test]
    fn test_create_into_unknown_column_is_dropped() {
        let mut r = Reconciler::new(demo_board());
        let before = r.snapshot();
        let outcome = r.apply(&new_card("card-5", "col-404"));

        assert_eq!(outcome, Applied::Dropped(DropReason::UnknownColumn("col-404".into())));
        assert!(Arc::ptr_eq(&before, &r.snapshot()));
        assert_eq!(r.version(), 0);
    }

    /// Replaying a create appends a second entry with the same id. This pins
    /// the current behavior; `upsert_creates` is the fix.
    #[test]
    fn test_duplicate_create_is_not_idempotent() {
        let mut r = Reconciler::new(demo_board());
        let create = new_card("card-5", "col-2");
        r.apply(&create);
        r.apply(&create);

        assert_eq!(ids(r.board(), "col-2"), vec!["card-3", "card-5", "card-5"]);
        assert_eq!(r.board().columns_holding("card-5"), vec!["col-2"]);
    }

    #[test]
    fn test_create_for_card_in_other_column_is_dropped() {
        let mut r = Reconciler::new(demo_board());
        let before = r.snapshot();

        let outcome = r.apply(&new_card("card-1", "col-2"));

        assert_eq!(outcome, Applied::Dropped(DropReason::CardConflict("card-1".into())));
        assert_eq!(r.board().columns_holding("card-1"), vec!["col-1"]);
        assert!(Arc::ptr_eq(&before, &r.snapshot()));
        assert_membership(r.board());
    }

    #[test]
    fn test_upsert_creates_is_idempotent() {
        let config = ReconcilerConfig { upsert_creates: true };
        let mut r = Reconciler::with_config(demo_board(), config);
        let create = new_card("card-5", "col-2");
        r.apply(&create);
        r.apply(&create);

        assert_eq!(ids(r.board(), "col-2"), vec!["card-3", "card-5"]);
    }

    #[test]
    fn test_update_replaces_wholesale() {
        let mut r = Reconciler::new(demo_board());
        let mut card = Card::new("card-1", "col-1", "Renamed");
        card.assignees = vec!["user-2".into()];

        assert_eq!(r.apply(&BoardEvent::CardUpdate(CardPayload { card })), Applied::Changed);
        let updated = r.board().card("card-1").unwrap();
        assert_eq!(updated.title, "Renamed");
        assert!(updated.labels.is_empty());
        assert_eq!(updated.assignees, vec!["user-2".to_string()]);
        assert_eq!(updated.position, 0);
    }

    #[test]
    fn test_update_keeps_membership() {
        let mut r = Reconciler::new(demo_board());
        // Claims another column; membership only changes through moves.
        let card = Card::new("card-1", "col-3", "Sneaky");
        r.apply(&BoardEvent::CardUpdate(CardPayload { card }));

        assert_eq!(r.board().columns_holding("card-1"), vec!["col-1"]);
        assert_eq!(r.board().card("card-1").unwrap().column_id, "col-1");
        assert_membership(r.board());
    }

    #[test]
    fn test_update_unknown_card_is_dropped() {
        let mut r = Reconciler::new(demo_board());
        let before = r.snapshot();
        let card = Card::new("card-404", "col-1", "Ghost");
        let outcome = r.apply(&BoardEvent::CardUpdate(CardPayload { card }));

        assert_eq!(outcome, Applied::Dropped(DropReason::UnknownCard("card-404".into())));
        assert!(Arc::ptr_eq(&before, &r.snapshot()));
    }

    #[test]
    fn test_cross_session_move_lands_at_index() {
        let mut board = demo_board();
        // Put card-3 in col-1 first.
        let card3 = board.columns[1].cards.remove(0);
        board.columns[0].cards.push(Card {
            column_id: "col-1".into(),
            ..card3
        });
        board.columns[0].renumber_cards();

        let mut r = Reconciler::new(board);
        let outcome = r.apply(&BoardEvent::card_move("card-3", "col-2", 0));

        assert_eq!(outcome, Applied::Changed);
        assert!(!ids(r.board(), "col-1").contains(&"card-3".to_string()));
        assert_eq!(ids(r.board(), "col-2")[0], "card-3");
        assert_eq!(r.board().card("card-3").unwrap().column_id, "col-2");
        assert_membership(r.board());
    }

    #[test]
    fn test_move_position_is_clamped() {
        let mut r = Reconciler::new(demo_board());
        r.apply(&BoardEvent::card_move("card-1", "col-3", 99));

        assert_eq!(ids(r.board(), "col-3"), vec!["card-4", "card-1"]);
        assert_eq!(r.board().card("card-1").unwrap().position, 1);
    }

    #[test]
    fn test_move_within_column() {
        let mut r = Reconciler::new(demo_board());
        r.apply(&BoardEvent::card_move("card-1", "col-1", 1));

        assert_eq!(ids(r.board(), "col-1"), vec!["card-2", "card-1"]);
        let positions: Vec<u32> = r.board().columns[0].cards.iter().map(|c| c.position).collect();
        assert_eq!(positions, vec![0, 1]);
    }

    #[test]
    fn test_move_to_unknown_column_changes_nothing() {
        let mut r = Reconciler::new(demo_board());
        let before = r.snapshot();
        let outcome = r.apply(&BoardEvent::card_move("card-1", "col-404", 0));

        assert_eq!(outcome, Applied::Dropped(DropReason::UnknownColumn("col-404".into())));
        assert_eq!(*r.snapshot(), *before);
        assert_eq!(ids(r.board(), "col-1"), vec!["card-1", "card-2"]);
    }

    #[test]
    fn test_move_unknown_card_changes_nothing() {
        let mut r = Reconciler::new(demo_board());
        let outcome = r.apply(&BoardEvent::card_move("card-404", "col-2", 0));
        assert_eq!(outcome, Applied::Dropped(DropReason::UnknownCard("card-404".into())));
        assert_eq!(r.version(), 0);
    }

    #[test]
    fn test_conflicting_moves_last_applied_wins() {
        let mut r = Reconciler::new(demo_board());
        let e1 = BoardEvent::card_move("card-1", "col-2", 0);
        let e2 = BoardEvent::card_move("card-1", "col-3", 0);
        r.apply(&e1);
        r.apply(&e2);

        assert_eq!(r.board().columns_holding("card-1"), vec!["col-3"]);
        assert_membership(r.board());
    }

    #[test]
    fn test_move_collapses_duplicates() {
        let mut r = Reconciler::new(demo_board());
        let create = new_card("card-5", "col-1");
        r.apply(&create);
        r.apply(&create);
        r.apply(&BoardEvent::card_move("card-5", "col-3", 0));

        assert_eq!(r.board().columns_holding("card-5"), vec!["col-3"]);
        assert_eq!(ids(r.board(), "col-3"), vec!["card-5", "card-4"]);
    }

    #[test]
    fn test_snapshot_replaces_state() {
        let mut r = Reconciler::new(demo_board());
        r.apply(&new_card("card-5", "col-1"));

        let mut payload = demo_board();
        payload.title = "Project Beta".into();
        payload.columns.truncate(1);

        assert_eq!(r.apply(&BoardEvent::board_update(payload.clone())), Applied::Changed);
        assert_eq!(*r.snapshot(), payload);
        assert!(r.board().card("card-5").is_none());
    }

    #[test]
    fn test_old_snapshots_are_never_mutated() {
        let mut r = Reconciler::new(demo_board());
        let held = r.snapshot();
        let copy = Board::clone(&held);

        r.apply(&BoardEvent::card_move("card-1", "col-3", 0));
        r.apply(&new_card("card-5", "col-2"));
        r.apply(&BoardEvent::CardDelete(CardDeletePayload { card_id: "card-2".into() }));

        assert_eq!(*held, copy);
        assert!(!Arc::ptr_eq(&held, &r.snapshot()));
    }

    #[test]
    fn test_delete_card() {
        let mut r = Reconciler::new(demo_board());
        r.apply(&BoardEvent::CardDelete(CardDeletePayload { card_id: "card-1".into() }));
        assert_eq!(ids(r.board(), "col-1"), vec!["card-2"]);
        assert_eq!(r.board().card("card-2").unwrap().position, 0);

        let outcome = r.apply(&BoardEvent::CardDelete(CardDeletePayload { card_id: "card-1".into() }));
        assert!(matches!(outcome, Applied::Dropped(DropReason::UnknownCard(_))));
    }

    #[test]
    fn test_column_lifecycle() {
        let mut r = Reconciler::new(demo_board());
        let column = Column::new("col-4", "board-1", "Review");
        assert_eq!(
            r.apply(&BoardEvent::ColumnCreate(ColumnPayload { column: column.clone() })),
            Applied::Changed
        );
        assert_eq!(r.board().columns.last().unwrap().position, 3);

        let mut renamed = column;
        renamed.title = "QA".into();
        r.apply(&BoardEvent::ColumnUpdate(ColumnPayload { column: renamed }));
        assert_eq!(r.board().column("col-4").unwrap().title, "QA");

        r.apply(&BoardEvent::ColumnDelete(ColumnDeletePayload { column_id: "col-1".into() }));
        assert!(r.board().card("card-1").is_none());
        assert!(r.board().card("card-2").is_none());
        let positions: Vec<u32> = r.board().columns.iter().map(|c| c.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn test_column_create_guards() {
        let mut r = Reconciler::new(demo_board());

        let foreign = Column::new("col-9", "board-2", "Elsewhere");
        let outcome = r.apply(&BoardEvent::ColumnCreate(ColumnPayload { column: foreign }));
        assert!(matches!(outcome, Applied::Dropped(DropReason::ForeignBoard { .. })));

        let mut stealing = Column::new("col-9", "board-1", "Thief");
        stealing.cards.push(Card::new("card-1", "col-9", "copy"));
        let outcome = r.apply(&BoardEvent::ColumnCreate(ColumnPayload { column: stealing }));
        assert_eq!(outcome, Applied::Dropped(DropReason::CardConflict("card-1".into())));
        assert_membership(r.board());
    }

    #[test]
    fn test_presence_events_leave_tree_alone() {
        let mut r = Reconciler::new(demo_board());
        let event = BoardEvent::UserTyping(crate::event::TypingPayload {
            user_id: "user-2".into(),
            card_id: "card-1".into(),
        });
        assert_eq!(r.apply(&event), Applied::Presence);
        assert_eq!(r.version(), 0);
    }

    #[test]
    fn test_membership_holds_under_event_storm() {
        let mut r = Reconciler::new(demo_board());
        let columns = ["col-1", "col-2", "col-3", "col-404"];
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for _ in 0..500 {
            let card = format!("card-{}", next() % 12);
            let column = columns[(next() % columns.len() as u64) as usize];
            let event = match next() % 3 {
                0 => BoardEvent::card_create(Card::new(card.clone(), column, "storm")),
                1 => BoardEvent::card_move(card.clone(), column, (next() % 5) as u32),
                _ => BoardEvent::CardDelete(CardDeletePayload { card_id: card.clone() }),
            };
            r.apply(&event);
            assert_membership(r.board());
        }
    }
}
