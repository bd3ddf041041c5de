//! Identifier generation for new entities.
//!
//! Every session mints ids independently, so they must not collide under
//! bursty concurrent creation. The default generator uses random v4 UUIDs;
//! the sequential generator is deterministic and meant for tests and demos.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Kind of entity an id is minted for. Determines the id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Board,
    Column,
    Card,
    Label,
    Comment,
    Checklist,
    ChecklistItem,
    Attachment,
}

impl EntityKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            EntityKind::Board => "board",
            EntityKind::Column => "col",
            EntityKind::Card => "card",
            EntityKind::Label => "label",
            EntityKind::Comment => "comment",
            EntityKind::Checklist => "checklist",
            EntityKind::ChecklistItem => "item",
            EntityKind::Attachment => "att",
        }
    }
}

#[derive(Debug)]
enum Strategy {
    Random,
    Sequential(AtomicU64),
}

/// Mints `<prefix>-<unique>` identifiers.
#[derive(Debug)]
pub struct IdGenerator {
    strategy: Strategy,
}

impl IdGenerator {
    /// Random v4 UUID suffixes; safe across independent sessions.
    pub fn random() -> Self {
        Self {
            strategy: Strategy::Random,
        }
    }

    /// Monotonic counter suffixes (`card-1`, `col-2`, …), unique per generator.
    pub fn sequential() -> Self {
        Self {
            strategy: Strategy::Sequential(AtomicU64::new(1)),
        }
    }

    pub fn next(&self, kind: EntityKind) -> String {
        match &self.strategy {
            Strategy::Random => format!("{}-{}", kind.prefix(), Uuid::new_v4()),
            Strategy::Sequential(counter) => {
                let n = counter.fetch_add(1, Ordering::Relaxed);
                format!("{}-{}", kind.prefix(), n)
            }
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::random()
    }
}
