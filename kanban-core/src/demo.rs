//! Seed board ("Project Alpha") used by the server binary and by tests.
//!
//! Layout:
//!
//! ```text
//! board-1
//! ├── col-1 "To Do"        card-1, card-2
//! ├── col-2 "In Progress"  card-3
//! └── col-3 "Done"         card-4
//! ```

use crate::{now_millis, Board, Card, Checklist, ChecklistItem, Column, Comment, Label};

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

fn label(id: &str, name: &str, color: &str) -> Label {
    Label {
        id: id.into(),
        name: name.into(),
        color: color.into(),
    }
}

pub fn demo_board() -> Board {
    let now = now_millis();

    let mut card1 = Card::new("card-1", "col-1", "Set up project structure");
    card1.description = Some("Initialize the project with proper folder structure".into());
    card1.labels = vec![
        label("label-1", "Setup", "#3b82f6"),
        label("label-2", "High Priority", "#ef4444"),
    ];
    card1.checklists = vec![Checklist {
        id: "checklist-1".into(),
        title: "Setup Tasks".into(),
        card_id: "card-1".into(),
        items: vec![
            ChecklistItem {
                id: "item-1".into(),
                text: "Create repository".into(),
                completed: true,
                checklist_id: "checklist-1".into(),
            },
            ChecklistItem {
                id: "item-2".into(),
                text: "Set up development environment".into(),
                completed: false,
                checklist_id: "checklist-1".into(),
            },
        ],
    }];
    card1.due_date = Some(now + 7 * DAY_MS);

    let mut card2 = Card::new("card-2", "col-1", "Design database schema");
    card2.position = 1;
    card2.labels = vec![label("label-3", "Database", "#10b981")];

    let mut card3 = Card::new("card-3", "col-2", "Implement authentication");
    card3.description = Some("Set up user registration and login system".into());
    card3.labels = vec![label("label-4", "Backend", "#8b5cf6")];
    card3.comments = vec![Comment {
        id: "comment-1".into(),
        content: "Started working on token verification".into(),
        author_id: "user-1".into(),
        card_id: "card-3".into(),
        created_at: now,
        updated_at: now,
    }];

    let mut card4 = Card::new("card-4", "col-3", "Project planning");
    card4.description = Some("Initial project planning and requirements gathering".into());
    card4.labels = vec![label("label-5", "Planning", "#8b5cf6")];
    card4.created_at = now.saturating_sub(5 * DAY_MS);
    card4.updated_at = now.saturating_sub(2 * DAY_MS);

    let mut todo = Column::new("col-1", "board-1", "To Do");
    todo.cards = vec![card1, card2];
    let mut doing = Column::new("col-2", "board-1", "In Progress");
    doing.position = 1;
    doing.cards = vec![card3];
    let mut done = Column::new("col-3", "board-1", "Done");
    done.position = 2;
    done.cards = vec![card4];

    Board {
        id: "board-1".into(),
        title: "Project Alpha".into(),
        description: Some("Main project board for Alpha initiative".into()),
        cover_image: None,
        owner_id: "user-1".into(),
        members: vec!["user-1".into()],
        columns: vec![todo, doing, done],
        created_at: now.saturating_sub(7 * DAY_MS),
        updated_at: now,
    }
}
