//! Presence roster: who is on the board, where their pointer is, and what
//! they are typing in.
//!
//! Presence never touches the board tree. Events from the local user are
//! ignored so a session does not render itself as a remote peer. Outgoing
//! cursor updates are rate-limited (33 ms, about 30 per second).
//!
//! The roster is keyed by user id. The relay only announces a departure once
//! a user's last connection has left the room.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use kanban_core::event::{CursorPayload, TypingPayload};
use kanban_core::{BoardEvent, Cursor, User};

/// Minimum spacing of local cursor broadcasts.
pub const CURSOR_INTERVAL: Duration = Duration::from_millis(33);

/// Stable `#rrggbb` color for a user, derived from the user id.
///
/// Hue comes from a hash of the id; saturation and lightness are fixed so
/// every cursor is equally vivid.
pub fn user_color(user_id: &str) -> String {
    // FNV-1a
    let hash = user_id
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |h, b| (h ^ b as u64).wrapping_mul(0x0100_0000_01b3));
    let hue = (hash % 360) as f32 / 360.0;
    let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
    format!(
        "#{:02x}{:02x}{:02x}",
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8
    )
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

/// Presence state of one board, as seen by one session.
pub struct PresenceRoster {
    local: User,
    users: HashMap<String, User>,
    cursors: HashMap<String, Cursor>,
    /// user id → card id
    typing: HashMap<String, String>,
    last_cursor_broadcast: Option<Instant>,
    cursor_interval: Duration,
}

impl PresenceRoster {
    pub fn new(local: User) -> Self {
        Self::with_interval(local, CURSOR_INTERVAL)
    }

    pub fn with_interval(local: User, cursor_interval: Duration) -> Self {
        Self {
            local,
            users: HashMap::new(),
            cursors: HashMap::new(),
            typing: HashMap::new(),
            last_cursor_broadcast: None,
            cursor_interval,
        }
    }

    /// Apply a remote presence event. Returns `true` if the roster changed.
    pub fn handle(&mut self, event: &BoardEvent) -> bool {
        match event {
            BoardEvent::BoardJoin(p) => {
                if p.user.id == self.local.id {
                    return false;
                }
                self.users.insert(p.user.id.clone(), p.user.clone());
                true
            }
            BoardEvent::BoardLeave(p) => {
                if p.user_id == self.local.id {
                    return false;
                }
                let known = self.users.remove(&p.user_id).is_some();
                let had_cursor = self.cursors.remove(&p.user_id).is_some();
                let was_typing = self.typing.remove(&p.user_id).is_some();
                known || had_cursor || was_typing
            }
            BoardEvent::CursorMove(p) => {
                if p.cursor.user_id == self.local.id {
                    return false;
                }
                log::trace!("Cursor of {} at ({}, {})", p.cursor.user_id, p.cursor.x, p.cursor.y);
                self.cursors.insert(p.cursor.user_id.clone(), p.cursor.clone());
                true
            }
            BoardEvent::UserTyping(p) => {
                if p.user_id == self.local.id {
                    return false;
                }
                self.typing.insert(p.user_id.clone(), p.card_id.clone());
                true
            }
            BoardEvent::UserStopTyping(p) => {
                if self.typing.get(&p.user_id) == Some(&p.card_id) {
                    self.typing.remove(&p.user_id);
                    return true;
                }
                false
            }
            _ => false,
        }
    }

    /// Cursor event for the local pointer, or `None` while throttled.
    pub fn update_local_cursor(&mut self, x: f64, y: f64) -> Option<BoardEvent> {
        if let Some(last) = self.last_cursor_broadcast {
            if last.elapsed() < self.cursor_interval {
                return None;
            }
        }
        Some(self.force_cursor(x, y))
    }

    /// Cursor event regardless of the rate limit.
    pub fn force_cursor(&mut self, x: f64, y: f64) -> BoardEvent {
        self.last_cursor_broadcast = Some(Instant::now());
        BoardEvent::CursorMove(CursorPayload {
            cursor: Cursor {
                user_id: self.local.id.clone(),
                user_name: self.local.name.clone(),
                x,
                y,
                color: user_color(&self.local.id),
            },
        })
    }

    pub fn start_typing(&self, card_id: impl Into<String>) -> BoardEvent {
        BoardEvent::UserTyping(TypingPayload {
            user_id: self.local.id.clone(),
            card_id: card_id.into(),
        })
    }

    pub fn stop_typing(&self, card_id: impl Into<String>) -> BoardEvent {
        BoardEvent::UserStopTyping(TypingPayload {
            user_id: self.local.id.clone(),
            card_id: card_id.into(),
        })
    }

    pub fn local_user(&self) -> &User {
        &self.local
    }

    /// Remote users present, ordered by name.
    pub fn users(&self) -> Vec<&User> {
        let mut users: Vec<&User> = self.users.values().collect();
        users.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        users
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn cursor(&self, user_id: &str) -> Option<&Cursor> {
        self.cursors.get(user_id)
    }

    pub fn cursors(&self) -> impl Iterator<Item = &Cursor> {
        self.cursors.values()
    }

    /// Users typing in `card_id`.
    pub fn typing_in(&self, card_id: &str) -> Vec<&str> {
        let mut users: Vec<&str> = self
            .typing
            .iter()
            .filter(|(_, card)| card.as_str() == card_id)
            .map(|(user, _)| user.as_str())
            .collect();
        users.sort_unstable();
        users
    }

    /// Forget everyone; used when the session leaves the board.
    pub fn clear(&mut self) {
        self.users.clear();
        self.cursors.clear();
        self.typing.clear();
    }
}
