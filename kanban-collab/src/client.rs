//! WebSocket client for the relay.
//!
//! Connects with a bearer token, forwards outgoing frames through a writer
//! task, and turns incoming relay frames into [`SyncEvent`]s on a channel.
//! There is no offline queue: the relay keeps no log, so events sent while
//! disconnected could never be ordered against what peers did meanwhile.
//! Sending while disconnected is an error; resynchronize from a snapshot.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use kanban_core::event::{JoinPayload, LeavePayload};
use kanban_core::{BoardEvent, User};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::protocol::{ClientFrame, ProtocolError, ServerFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone)]
pub enum SyncEvent {
    Connected,
    /// Handshake accepted; carries the identity the relay will stamp.
    Welcome { connection_id: Uuid, user: User },
    /// Event relayed from another session or pushed by the collaborator.
    Remote {
        origin: String,
        board_id: String,
        event: BoardEvent,
    },
    Rejected { event: Option<String>, reason: String },
    Disconnected,
}

pub struct SyncClient {
    server_url: String,
    token: String,
    state: Arc<RwLock<ConnectionState>>,
    outgoing_tx: Option<mpsc::Sender<String>>,
    event_tx: mpsc::Sender<SyncEvent>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
}

impl SyncClient {
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            token: token.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Open the connection. A refused credential surfaces as
    /// [`ProtocolError::Connect`].
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let mut request = self
            .server_url
            .as_str()
            .into_client_request()
            .map_err(|e| ProtocolError::Connect(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|e| ProtocolError::Connect(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let ws_stream = match tokio_tungstenite::connect_async(request).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::Connect(e.to_string()));
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::text(text)).await.is_err() {
                    return;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(SyncEvent::Connected).await;

        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Some(event) = Self::interpret(text.as_str()) {
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(SyncEvent::Disconnected).await;
        });

        Ok(())
    }

    fn interpret(text: &str) -> Option<SyncEvent> {
        let frame = match ServerFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("Ignoring undecodable relay frame: {e}");
                return None;
            }
        };
        match frame {
            ServerFrame::Event {
                origin,
                board_id,
                event,
                data,
            } => match BoardEvent::from_parts(&event, data) {
                Ok(event) => Some(SyncEvent::Remote {
                    origin,
                    board_id,
                    event,
                }),
                Err(e) => {
                    log::debug!("Ignoring relayed {event}: {e}");
                    None
                }
            },
            ServerFrame::Welcome { connection_id, user } => Some(SyncEvent::Welcome { connection_id, user }),
            ServerFrame::Rejected { event, reason } => Some(SyncEvent::Rejected { event, reason }),
        }
    }

    pub async fn send(&self, frame: &ClientFrame) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::NotConnected);
        }
        let tx = self.outgoing_tx.as_ref().ok_or(ProtocolError::NotConnected)?;
        tx.send(frame.encode()?)
            .await
            .map_err(|_| ProtocolError::NotConnected)
    }

    pub async fn send_event(&self, event: &BoardEvent, board_id: Option<&str>) -> Result<(), ProtocolError> {
        self.send(&ClientFrame::new(event, board_id)?).await
    }

    /// Join a board room. The relay replaces `user` with the authenticated
    /// identity before relaying.
    pub async fn join(&self, board_id: &str, user: User) -> Result<(), ProtocolError> {
        let event = BoardEvent::BoardJoin(JoinPayload {
            board_id: board_id.to_string(),
            user,
        });
        self.send_event(&event, None).await
    }

    pub async fn leave(&self, board_id: &str, user_id: &str) -> Result<(), ProtocolError> {
        let event = BoardEvent::BoardLeave(LeavePayload {
            board_id: board_id.to_string(),
            user_id: user_id.to_string(),
        });
        self.send_event(&event, None).await
    }

    /// Close the connection after flushing queued frames.
    pub async fn disconnect(&mut self) {
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_initial_state() {
        let mut client = SyncClient::new("ws://127.0.0.1:1", "token");
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }

    #[tokio::test]
    async fn test_send_while_disconnected_fails() {
        let client = SyncClient::new("ws://127.0.0.1:1", "token");
        let err = client
            .send_event(&BoardEvent::card_move("card-1", "col-2", 0), Some("board-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::NotConnected));
    }

    #[tokio::test]
    async fn test_connect_to_nothing_fails() {
        // Port 1 is reserved and never listening in test environments.
        let mut client = SyncClient::new("ws://127.0.0.1:1", "token");
        assert!(matches!(client.connect().await, Err(ProtocolError::Connect(_))));
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[test]
    fn test_interpret_frames() {
        let text = r#"{"type":"event","origin":"user-2","boardId":"board-1","event":"card:delete","data":{"cardId":"card-1"}}"#;
        match SyncClient::interpret(text) {
            Some(SyncEvent::Remote { origin, board_id, event }) => {
                assert_eq!(origin, "user-2");
                assert_eq!(board_id, "board-1");
                assert_eq!(event.name(), "card:delete");
            }
            other => panic!("unexpected {other:?}"),
        }

        let text = r#"{"type":"rejected","event":null,"reason":"bad"}"#;
        assert!(matches!(SyncClient::interpret(text), Some(SyncEvent::Rejected { .. })));

        // Invalid relayed payloads are skipped, not surfaced.
        let text = r#"{"type":"event","origin":"u","boardId":"b","event":"card:move","data":{}}"#;
        assert!(SyncClient::interpret(text).is_none());
        assert!(SyncClient::interpret("garbage").is_none());
    }
}
