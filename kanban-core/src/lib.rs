//! # kanban-core — board model and local state engine
//!
//! Everything a session needs to hold and mutate its own copy of a board,
//! without any I/O:
//!
//! - the board tree (`Board` → `Column` → `Card`) and its value records
//! - [`event`] — the real-time event vocabulary and payload validation
//! - [`reconcile`] — applies local and remote events copy-on-write
//! - [`resolve`] — computes optimistic local edits and their outgoing events
//! - [`ids`] — collision-resistant identifier generation
//! - [`store`] — storage seam for the snapshot collaborator
//!
//! Sequence order is authoritative. The `position` fields are a cached hint
//! that this crate renumbers whenever it changes a sequence.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

pub mod demo;
pub mod event;
pub mod ids;
pub mod reconcile;
pub mod resolve;
pub mod store;

pub use event::{BoardEvent, EventError};
pub use ids::{EntityKind, IdGenerator};
pub use reconcile::{Applied, DropReason, Reconciler, ReconcilerConfig};
pub use resolve::{LocalEdit, OrderResolver, ResolveError};
pub use store::{BoardStore, MemoryBoardStore, StoreError};

/// Titles of the columns every new board starts with.
pub const DEFAULT_COLUMNS: [&str; 3] = ["To Do", "In Progress", "Done"];

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_online: Option<bool>,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            avatar: None,
            is_online: None,
        }
    }
}

/// Pointer position of a remote user, in board coordinates.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub user_id: String,
    pub user_name: String,
    pub x: f64,
    pub y: f64,
    pub color: String,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    pub owner_id: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

impl Board {
    /// A fresh board owned by `owner_id`, with the three default columns.
    pub fn new(ids: &IdGenerator, title: impl Into<String>, owner_id: impl Into<String>) -> Self {
        let id = ids.next(EntityKind::Board);
        let owner_id = owner_id.into();
        let columns = DEFAULT_COLUMNS
            .iter()
            .enumerate()
            .map(|(index, title)| {
                let mut column = Column::new(ids.next(EntityKind::Column), &id, *title);
                column.position = index as u32;
                column
            })
            .collect();
        let now = now_millis();
        Self {
            id,
            title: title.into(),
            description: None,
            cover_image: None,
            members: vec![owner_id.clone()],
            owner_id,
            columns,
            created_at: now,
            updated_at: now,
        }
    }

    /// Owner or member.
    pub fn is_visible_to(&self, user_id: &str) -> bool {
        self.owner_id == user_id || self.members.iter().any(|m| m == user_id)
    }

    /// Adds a member; members are a set, so adding twice is a no-op.
    pub fn add_member(&mut self, user_id: impl Into<String>) -> bool {
        let user_id = user_id.into();
        if self.members.contains(&user_id) {
            return false;
        }
        self.members.push(user_id);
        true
    }

    pub fn column(&self, column_id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == column_id)
    }

    pub fn column_index(&self, column_id: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.id == column_id)
    }

    /// `(column index, card index)` of the first card with this id.
    pub fn locate_card(&self, card_id: &str) -> Option<(usize, usize)> {
        self.columns.iter().enumerate().find_map(|(ci, column)| {
            column
                .cards
                .iter()
                .position(|card| card.id == card_id)
                .map(|ki| (ci, ki))
        })
    }

    pub fn card(&self, card_id: &str) -> Option<&Card> {
        self.locate_card(card_id)
            .map(|(ci, ki)| &self.columns[ci].cards[ki])
    }

    /// Ids of every column whose sequence holds `card_id`.
    pub fn columns_holding(&self, card_id: &str) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.cards.iter().any(|card| card.id == card_id))
            .map(|c| c.id.as_str())
            .collect()
    }

    pub fn card_count(&self) -> usize {
        self.columns.iter().map(|c| c.cards.len()).sum()
    }

    pub fn renumber_columns(&mut self) {
        for (index, column) in self.columns.iter_mut().enumerate() {
            column.position = index as u32;
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub position: u32,
    pub board_id: String,
    #[serde(default)]
    pub cards: Vec<Card>,
}

impl Column {
    pub fn new(id: impl Into<String>, board_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            position: 0,
            board_id: board_id.into(),
            cards: Vec::new(),
        }
    }

    pub fn card_ids(&self) -> Vec<&str> {
        self.cards.iter().map(|c| c.id.as_str()).collect()
    }

    pub fn renumber_cards(&mut self) {
        for (index, card) in self.cards.iter_mut().enumerate() {
            card.position = index as u32;
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub position: u32,
    pub column_id: String,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<u64>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub checklists: Vec<Checklist>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

impl Card {
    pub fn new(id: impl Into<String>, column_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            position: 0,
            column_id: column_id.into(),
            assignees: Vec::new(),
            labels: Vec::new(),
            due_date: None,
            comments: Vec::new(),
            checklists: Vec::new(),
            attachments: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Label {
    pub id: String,
    pub name: String,
    pub color: String,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub content: String,
    pub author_id: String,
    pub card_id: String,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Checklist {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub items: Vec<ChecklistItem>,
    pub card_id: String,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistItem {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
    pub checklist_id: String,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub url: String,
    /// MIME type.
    #[serde(rename = "type")]
    pub content_type: String,
    pub size: u64,
    pub card_id: String,
    #[serde(default)]
    pub uploaded_at: u64,
}
