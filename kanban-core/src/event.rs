//! Real-time event vocabulary.
//!
//! Every event travels as a name (`"card:move"`) plus a JSON payload. The
//! payload shapes are fixed per name; [`BoardEvent::from_parts`] parses and
//! validates them so that malformed events are rejected at the edge instead
//! of being applied or relayed.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::{Board, Card, Column, Cursor, User};

pub const BOARD_JOIN: &str = "board:join";
pub const BOARD_LEAVE: &str = "board:leave";
pub const BOARD_UPDATE: &str = "board:update";
pub const CARD_CREATE: &str = "card:create";
pub const CARD_UPDATE: &str = "card:update";
pub const CARD_DELETE: &str = "card:delete";
pub const CARD_MOVE: &str = "card:move";
pub const COLUMN_CREATE: &str = "column:create";
pub const COLUMN_UPDATE: &str = "column:update";
pub const COLUMN_DELETE: &str = "column:delete";
pub const CURSOR_MOVE: &str = "cursor:move";
pub const USER_TYPING: &str = "user:typing";
pub const USER_STOP_TYPING: &str = "user:stop-typing";

/// All event names, in vocabulary order.
pub const EVENT_NAMES: [&str; 13] = [
    BOARD_JOIN,
    BOARD_LEAVE,
    BOARD_UPDATE,
    CARD_CREATE,
    CARD_UPDATE,
    CARD_DELETE,
    CARD_MOVE,
    COLUMN_CREATE,
    COLUMN_UPDATE,
    COLUMN_DELETE,
    CURSOR_MOVE,
    USER_TYPING,
    USER_STOP_TYPING,
];

#[derive(Debug, Error)]
pub enum EventError {
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
    #[error("malformed `{event}` payload: {source}")]
    Malformed {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid `{event}` payload: {reason}")]
    Invalid { event: &'static str, reason: String },
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub board_id: String,
    pub user: User,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeavePayload {
    pub board_id: String,
    pub user_id: String,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct SnapshotPayload {
    pub board: Board,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct CardPayload {
    pub card: Card,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CardDeletePayload {
    pub card_id: String,
}

/// Target membership of a card: `position` is the absolute index in the
/// target column's sequence after the move.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CardMovePayload {
    pub card_id: String,
    pub column_id: String,
    pub position: u32,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ColumnPayload {
    pub column: Column,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDeletePayload {
    pub column_id: String,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct CursorPayload {
    pub cursor: Cursor,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub user_id: String,
    pub card_id: String,
}

/// One event of the board-room vocabulary.
#[derive(Clone, Debug, PartialEq)]
pub enum BoardEvent {
    BoardJoin(JoinPayload),
    BoardLeave(LeavePayload),
    /// Full snapshot replace.
    BoardUpdate(SnapshotPayload),
    CardCreate(CardPayload),
    CardUpdate(CardPayload),
    CardDelete(CardDeletePayload),
    CardMove(CardMovePayload),
    ColumnCreate(ColumnPayload),
    ColumnUpdate(ColumnPayload),
    ColumnDelete(ColumnDeletePayload),
    CursorMove(CursorPayload),
    UserTyping(TypingPayload),
    UserStopTyping(TypingPayload),
}

fn parse<T: DeserializeOwned>(event: &'static str, data: Value) -> Result<T, EventError> {
    serde_json::from_value(data).map_err(|source| EventError::Malformed { event, source })
}

fn invalid(event: &'static str, reason: impl Into<String>) -> EventError {
    EventError::Invalid {
        event,
        reason: reason.into(),
    }
}

fn require(event: &'static str, field: &str, value: &str) -> Result<(), EventError> {
    if value.trim().is_empty() {
        return Err(invalid(event, format!("`{field}` must not be empty")));
    }
    Ok(())
}

impl BoardEvent {
    pub fn card_move(card_id: impl Into<String>, column_id: impl Into<String>, position: u32) -> Self {
        BoardEvent::CardMove(CardMovePayload {
            card_id: card_id.into(),
            column_id: column_id.into(),
            position,
        })
    }

    pub fn card_create(card: Card) -> Self {
        BoardEvent::CardCreate(CardPayload { card })
    }

    pub fn board_update(board: Board) -> Self {
        BoardEvent::BoardUpdate(SnapshotPayload { board })
    }

    /// Parse a named event from its JSON payload and validate it.
    pub fn from_parts(name: &str, data: Value) -> Result<Self, EventError> {
        let event = match name {
            BOARD_JOIN => BoardEvent::BoardJoin(parse(BOARD_JOIN, data)?),
            BOARD_LEAVE => BoardEvent::BoardLeave(parse(BOARD_LEAVE, data)?),
            BOARD_UPDATE => BoardEvent::BoardUpdate(parse(BOARD_UPDATE, data)?),
            CARD_CREATE => BoardEvent::CardCreate(parse(CARD_CREATE, data)?),
            CARD_UPDATE => BoardEvent::CardUpdate(parse(CARD_UPDATE, data)?),
            CARD_DELETE => BoardEvent::CardDelete(parse(CARD_DELETE, data)?),
            CARD_MOVE => BoardEvent::CardMove(parse(CARD_MOVE, data)?),
            COLUMN_CREATE => BoardEvent::ColumnCreate(parse(COLUMN_CREATE, data)?),
            COLUMN_UPDATE => BoardEvent::ColumnUpdate(parse(COLUMN_UPDATE, data)?),
            COLUMN_DELETE => BoardEvent::ColumnDelete(parse(COLUMN_DELETE, data)?),
            CURSOR_MOVE => BoardEvent::CursorMove(parse(CURSOR_MOVE, data)?),
            USER_TYPING => BoardEvent::UserTyping(parse(USER_TYPING, data)?),
            USER_STOP_TYPING => BoardEvent::UserStopTyping(parse(USER_STOP_TYPING, data)?),
            other => return Err(EventError::UnknownEvent(other.to_string())),
        };
        event.validate()?;
        Ok(event)
    }

    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            BoardEvent::BoardJoin(_) => BOARD_JOIN,
            BoardEvent::BoardLeave(_) => BOARD_LEAVE,
            BoardEvent::BoardUpdate(_) => BOARD_UPDATE,
            BoardEvent::CardCreate(_) => CARD_CREATE,
            BoardEvent::CardUpdate(_) => CARD_UPDATE,
            BoardEvent::CardDelete(_) => CARD_DELETE,
            BoardEvent::CardMove(_) => CARD_MOVE,
            BoardEvent::ColumnCreate(_) => COLUMN_CREATE,
            BoardEvent::ColumnUpdate(_) => COLUMN_UPDATE,
            BoardEvent::ColumnDelete(_) => COLUMN_DELETE,
            BoardEvent::CursorMove(_) => CURSOR_MOVE,
            BoardEvent::UserTyping(_) => USER_TYPING,
            BoardEvent::UserStopTyping(_) => USER_STOP_TYPING,
        }
    }

    /// JSON payload of this event.
    pub fn data(&self) -> Result<Value, serde_json::Error> {
        match self {
            BoardEvent::BoardJoin(p) => serde_json::to_value(p),
            BoardEvent::BoardLeave(p) => serde_json::to_value(p),
            BoardEvent::BoardUpdate(p) => serde_json::to_value(p),
            BoardEvent::CardCreate(p) | BoardEvent::CardUpdate(p) => serde_json::to_value(p),
            BoardEvent::CardDelete(p) => serde_json::to_value(p),
            BoardEvent::CardMove(p) => serde_json::to_value(p),
            BoardEvent::ColumnCreate(p) | BoardEvent::ColumnUpdate(p) => serde_json::to_value(p),
            BoardEvent::ColumnDelete(p) => serde_json::to_value(p),
            BoardEvent::CursorMove(p) => serde_json::to_value(p),
            BoardEvent::UserTyping(p) | BoardEvent::UserStopTyping(p) => serde_json::to_value(p),
        }
    }

    /// Presence events update the roster, never the board tree.
    pub fn is_presence(&self) -> bool {
        matches!(
            self,
            BoardEvent::BoardJoin(_)
                | BoardEvent::BoardLeave(_)
                | BoardEvent::CursorMove(_)
                | BoardEvent::UserTyping(_)
                | BoardEvent::UserStopTyping(_)
        )
    }

    /// Room named by the payload itself (join, leave and snapshots carry one).
    pub fn board_id(&self) -> Option<&str> {
        match self {
            BoardEvent::BoardJoin(p) => Some(&p.board_id),
            BoardEvent::BoardLeave(p) => Some(&p.board_id),
            BoardEvent::BoardUpdate(p) => Some(&p.board.id),
            _ => None,
        }
    }

    /// Semantic checks beyond the payload shape.
    pub fn validate(&self) -> Result<(), EventError> {
        let name = self.name();
        match self {
            BoardEvent::BoardJoin(p) => {
                require(name, "boardId", &p.board_id)?;
                require(name, "user.id", &p.user.id)
            }
            BoardEvent::BoardLeave(p) => {
                require(name, "boardId", &p.board_id)?;
                require(name, "userId", &p.user_id)
            }
            BoardEvent::BoardUpdate(p) => validate_board(name, &p.board),
            BoardEvent::CardCreate(p) | BoardEvent::CardUpdate(p) => {
                require(name, "card.id", &p.card.id)?;
                require(name, "card.columnId", &p.card.column_id)
            }
            BoardEvent::CardDelete(p) => require(name, "cardId", &p.card_id),
            BoardEvent::CardMove(p) => {
                require(name, "cardId", &p.card_id)?;
                require(name, "columnId", &p.column_id)
            }
            BoardEvent::ColumnCreate(p) | BoardEvent::ColumnUpdate(p) => {
                require(name, "column.id", &p.column.id)?;
                require(name, "column.boardId", &p.column.board_id)?;
                validate_column_cards(name, &p.column)
            }
            BoardEvent::ColumnDelete(p) => require(name, "columnId", &p.column_id),
            BoardEvent::CursorMove(p) => {
                require(name, "cursor.userId", &p.cursor.user_id)?;
                if !p.cursor.x.is_finite() || !p.cursor.y.is_finite() {
                    return Err(invalid(name, "cursor coordinates must be finite"));
                }
                Ok(())
            }
            BoardEvent::UserTyping(p) | BoardEvent::UserStopTyping(p) => {
                require(name, "userId", &p.user_id)?;
                require(name, "cardId", &p.card_id)
            }
        }
    }
}

fn validate_column_cards(name: &'static str, column: &Column) -> Result<(), EventError> {
    match column.cards.iter().find(|card| card.column_id != column.id) {
        Some(card) => Err(invalid(
            name,
            format!("card `{}` claims column `{}` but sits in `{}`", card.id, card.column_id, column.id),
        )),
        None => Ok(()),
    }
}

/// A snapshot must itself satisfy the membership invariant.
fn validate_board(name: &'static str, board: &Board) -> Result<(), EventError> {
    require(name, "board.id", &board.id)?;
    let mut column_ids = HashSet::new();
    let mut card_homes: HashMap<&str, &str> = HashMap::new();

    for column in &board.columns {
        require(name, "column.id", &column.id)?;
        if !column_ids.insert(column.id.as_str()) {
            return Err(invalid(name, format!("duplicate column `{}`", column.id)));
        }
        if column.board_id != board.id {
            return Err(invalid(
                name,
                format!("column `{}` belongs to board `{}`", column.id, column.board_id),
            ));
        }
        validate_column_cards(name, column)?;
        for card in &column.cards {
            if let Some(home) = card_homes.insert(card.id.as_str(), column.id.as_str()) {
                if home != column.id {
                    return Err(invalid(
                        name,
                        format!("card `{}` appears in both `{}` and `{}`", card.id, home, column.id),
                    ));
                }
            }
        }
    }
    Ok(())
}
