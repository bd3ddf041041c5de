//! JSON wire protocol between sessions and the relay.
//!
//! Every WebSocket text frame is one JSON object.
//!
//! ```text
//! session → relay   { "event": "card:move", "boardId": "board-1", "data": { … } }
//! relay → session   { "type": "event", "origin": "user-1", "boardId": "board-1",
//!                     "event": "card:move", "data": { … } }
//!                   { "type": "welcome", "connectionId": "…", "user": { … } }
//!                   { "type": "rejected", "event": "card:move", "reason": "…" }
//! ```
//!
//! `boardId` on client frames may be left out when the connection has joined
//! exactly one room. `board:join` and `board:leave` name their room in the
//! payload.

use kanban_core::event::EventError;
use kanban_core::{BoardEvent, User};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),
    #[error(transparent)]
    Event(#[from] EventError),
    #[error("binary frames are not supported")]
    Binary,
    #[error("no board given and the connection is in {joined} rooms")]
    AmbiguousRoom { joined: usize },
    #[error("not connected")]
    NotConnected,
    #[error("connection failed: {0}")]
    Connect(String),
}

/// Frame sent by a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl ClientFrame {
    pub fn new(event: &BoardEvent, board_id: Option<&str>) -> Result<Self, ProtocolError> {
        Ok(Self {
            event: event.name().to_string(),
            board_id: board_id.map(str::to_string),
            data: event.data().map_err(ProtocolError::Encode)?,
        })
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }

    /// Parse and validate the carried event.
    pub fn to_event(&self) -> Result<BoardEvent, EventError> {
        BoardEvent::from_parts(&self.event, self.data.clone())
    }

    /// Room the frame targets: the payload's own board, then the explicit
    /// `boardId`, then the only joined room.
    pub fn target_room<'a>(
        &'a self,
        event: &'a BoardEvent,
        joined: &'a [String],
    ) -> Result<&'a str, ProtocolError> {
        if let Some(board) = event.board_id() {
            return Ok(board);
        }
        if let Some(board) = self.board_id.as_deref() {
            return Ok(board);
        }
        match joined {
            [only] => Ok(only),
            _ => Err(ProtocolError::AmbiguousRoom {
                joined: joined.len(),
            }),
        }
    }
}

/// Frame sent by the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    Event {
        /// User id of the sender, or `"server"` for collaborator pushes.
        origin: String,
        board_id: String,
        event: String,
        data: Value,
    },
    #[serde(rename_all = "camelCase")]
    Welcome { connection_id: Uuid, user: User },
    Rejected {
        event: Option<String>,
        reason: String,
    },
}

/// Origin stamped on events published by the relay itself.
pub const SERVER_ORIGIN: &str = "server";

impl ServerFrame {
    pub fn event(origin: &str, board_id: &str, event: &BoardEvent) -> Result<Self, ProtocolError> {
        Ok(ServerFrame::Event {
            origin: origin.to_string(),
            board_id: board_id.to_string(),
            event: event.name().to_string(),
            data: event.data().map_err(ProtocolError::Encode)?,
        })
    }

    pub fn rejected(event: Option<&str>, reason: impl Into<String>) -> Self {
        ServerFrame::Rejected {
            event: event.map(str::to_string),
            reason: reason.into(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kanban_core::event::{CardDeletePayload, CARD_MOVE};
    use serde_json::json;

    #[test]
    fn test_client_frame_shape() {
        let event = BoardEvent::card_move("card-3", "col-2", 0);
        let frame = ClientFrame::new(&event, Some("board-1")).unwrap();
        let json: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();

        assert_eq!(
            json,
            json!({
                "event": "card:move",
                "boardId": "board-1",
                "data": { "cardId": "card-3", "columnId": "col-2", "position": 0 }
            })
        );
    }

    #[test]
    fn test_client_frame_without_board() {
        let frame = ClientFrame::decode(r#"{"event":"card:delete","data":{"cardId":"card-1"}}"#).unwrap();
        assert!(frame.board_id.is_none());
        let event = frame.to_event().unwrap();
        assert_eq!(
            event,
            BoardEvent::CardDelete(CardDeletePayload { card_id: "card-1".into() })
        );

        let joined = vec!["board-1".to_string()];
        assert_eq!(frame.target_room(&event, &joined).unwrap(), "board-1");

        let two = vec!["board-1".to_string(), "board-2".to_string()];
        assert!(matches!(
            frame.target_room(&event, &two),
            Err(ProtocolError::AmbiguousRoom { joined: 2 })
        ));
        assert!(frame.target_room(&event, &[]).is_err());
    }

    #[test]
    fn test_join_takes_room_from_payload() {
        let frame = ClientFrame::decode(
            r#"{"event":"board:join","boardId":"ignored",
                "data":{"boardId":"board-7","user":{"id":"u","name":"U","email":"u@x.io"}}}"#,
        )
        .unwrap();
        let event = frame.to_event().unwrap();
        assert_eq!(frame.target_room(&event, &[]).unwrap(), "board-7");
    }

    #[test]
    fn test_invalid_payload_surfaces_event_error() {
        let frame = ClientFrame::decode(r#"{"event":"card:move","data":{"cardId":"x"}}"#).unwrap();
        let err = frame.to_event().unwrap_err();
        assert!(matches!(err, EventError::Malformed { event: CARD_MOVE, .. }));
        assert!(ClientFrame::decode("not json").is_err());
    }

    #[test]
    fn test_server_frame_tags() {
        let event = BoardEvent::card_move("card-3", "col-2", 0);
        let frame = ServerFrame::event("user-1", "board-1", &event).unwrap();
        let json: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["boardId"], "board-1");
        assert_eq!(json["origin"], "user-1");
        assert_eq!(json["data"]["columnId"], "col-2");

        let welcome = ServerFrame::Welcome {
            connection_id: Uuid::nil(),
            user: User::new("user-1", "Alice", "alice@example.com"),
        };
        let json: Value = serde_json::from_str(&welcome.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "welcome");
        assert_eq!(json["connectionId"], Uuid::nil().to_string());

        let rejected = ServerFrame::rejected(None, "malformed frame");
        let json: Value = serde_json::from_str(&rejected.encode().unwrap()).unwrap();
        assert_eq!(json, json!({ "type": "rejected", "event": null, "reason": "malformed frame" }));
    }

    #[test]
    fn test_server_frame_decode() {
        let text = r#"{"type":"rejected","event":"card:move","reason":"not a member"}"#;
        assert_eq!(
            ServerFrame::decode(text).unwrap(),
            ServerFrame::rejected(Some("card:move"), "not a member")
        );
        assert!(ServerFrame::decode(r#"{"type":"mystery"}"#).is_err());
    }
}
