//! WebSocket relay: authenticates sessions and rebroadcasts board events
//! to the other members of a room.
//!
//! ```text
//! Session A ──┐  bearer check      ┌── Room board-1 ──► Session B
//!             ├─ (upgrade) ─ relay ┤                 └─► Session C
//! Session D ──┘                    └── Room board-2 ──► Session E
//! ```
//!
//! The relay holds no board content. It validates frames, stamps presence
//! payloads with the authenticated identity, and fans them out. Each
//! connection runs in its own task with a bounded outbox; a slow peer only
//! loses its own frames.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use kanban_core::event::LeavePayload;
use kanban_core::{BoardEvent, BoardStore};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{Broadcaster, Outbox};
use crate::protocol::{ClientFrame, ProtocolError, ServerFrame, SERVER_ORIGIN};
use crate::session::{token_from_request, CredentialVerifier, Identity, SessionRegistry};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// 0 = unbounded.
    pub max_peers_per_room: usize,
    /// Frames buffered per connection before new ones are dropped.
    pub outbox_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_peers_per_room: 100,
            outbox_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_handshakes: u64,
    pub total_frames: u64,
    pub rejected_frames: u64,
    pub active_rooms: usize,
}

#[derive(Default)]
struct AtomicServerStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_handshakes: AtomicU64,
    total_frames: AtomicU64,
    rejected_frames: AtomicU64,
}

/// State shared by every connection task.
#[derive(Clone)]
struct Context {
    registry: Arc<SessionRegistry>,
    broadcaster: Arc<Broadcaster>,
    store: Option<Arc<dyn BoardStore>>,
    stats: Arc<AtomicServerStats>,
    outbox_capacity: usize,
}

pub struct RelayServer {
    config: ServerConfig,
    ctx: Context,
}

impl RelayServer {
    pub fn new(config: ServerConfig, verifier: Arc<dyn CredentialVerifier>) -> Self {
        let max_peers = (config.max_peers_per_room > 0).then_some(config.max_peers_per_room);
        let ctx = Context {
            registry: Arc::new(SessionRegistry::new(verifier)),
            broadcaster: Arc::new(Broadcaster::new(max_peers)),
            store: None,
            stats: Arc::new(AtomicServerStats::default()),
            outbox_capacity: config.outbox_capacity.max(1),
        };
        Self { config, ctx }
    }

    /// Only owners and members of a stored board may join its room.
    pub fn with_store(mut self, store: Arc<dyn BoardStore>) -> Self {
        self.ctx.store = Some(store);
        self
    }

    /// Handle for pushing events into rooms from outside the relay.
    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            broadcaster: self.ctx.broadcaster.clone(),
        }
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.ctx.registry
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.ctx.broadcaster
    }

    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, ctx).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    pub async fn stats(&self) -> ServerStats {
        let s = &self.ctx.stats;
        ServerStats {
            total_connections: s.total_connections.load(Ordering::Relaxed),
            active_connections: s.active_connections.load(Ordering::Relaxed),
            rejected_handshakes: s.rejected_handshakes.load(Ordering::Relaxed),
            total_frames: s.total_frames.load(Ordering::Relaxed),
            rejected_frames: s.rejected_frames.load(Ordering::Relaxed),
            active_rooms: self.ctx.broadcaster.room_count().await,
        }
    }

    async fn handle_connection(stream: TcpStream, addr: SocketAddr, ctx: Context) -> Result<(), BoxError> {
        let connection_id = Uuid::new_v4();
        let mut identity: Option<Identity> = None;

        let registry = ctx.registry.clone();
        let check = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let token = token_from_request(request);
            match registry.authenticate(connection_id, token.as_deref()) {
                Ok(id) => {
                    identity = Some(id);
                    Ok(response)
                }
                Err(e) => {
                    let mut refusal = ErrorResponse::new(Some(e.to_string()));
                    *refusal.status_mut() = StatusCode::UNAUTHORIZED;
                    Err(refusal)
                }
            }
        };

        let accepted = tokio_tungstenite::accept_hdr_async(stream, check).await;
        let ws_stream = match accepted {
            Ok(ws) => ws,
            Err(e) => {
                if identity.is_none() {
                    ctx.stats.rejected_handshakes.fetch_add(1, Ordering::Relaxed);
                    log::warn!("Refused handshake from {addr}: {e}");
                    return Ok(());
                }
                ctx.registry.disconnect(connection_id);
                return Err(e.into());
            }
        };
        let Some(identity) = identity else {
            ctx.registry.disconnect(connection_id);
            return Ok(());
        };

        ctx.stats.total_connections.fetch_add(1, Ordering::Relaxed);
        ctx.stats.active_connections.fetch_add(1, Ordering::Relaxed);
        log::info!("{} ({}) connected from {addr} as {connection_id}", identity.name, identity.user_id);

        let (outbox, inbox) = mpsc::channel(ctx.outbox_capacity);
        let connection = Connection {
            id: connection_id,
            identity,
            outbox,
            ctx,
        };
        let result = connection.run(ws_stream, inbox).await;
        connection.cleanup().await;
        connection.ctx.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
        result
    }
}

/// One authenticated connection.
struct Connection {
    id: Uuid,
    identity: Identity,
    outbox: Outbox,
    ctx: Context,
}

impl Connection {
    async fn run(
        &self,
        ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
        mut inbox: mpsc::Receiver<Arc<str>>,
    ) -> Result<(), BoxError> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let welcome = ServerFrame::Welcome {
            connection_id: self.id,
            user: self.identity.user(),
        };
        ws_sender.send(Message::text(welcome.encode()?)).await?;

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.ctx.stats.total_frames.fetch_add(1, Ordering::Relaxed);
                            if let Some(reply) = self.handle_text(text.as_str()).await {
                                self.ctx.stats.rejected_frames.fetch_add(1, Ordering::Relaxed);
                                ws_sender.send(Message::text(reply.encode()?)).await?;
                            }
                        }
                        Some(Ok(Message::Binary(_))) => {
                            self.ctx.stats.rejected_frames.fetch_add(1, Ordering::Relaxed);
                            let reply = ServerFrame::rejected(None, ProtocolError::Binary.to_string());
                            ws_sender.send(Message::text(reply.encode()?)).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection {} closed", self.id);
                            break;
                        }
                        Some(Err(e)) => {
                            log::error!("WebSocket error on {}: {e}", self.id);
                            break;
                        }
                        _ => {}
                    }
                }

                frame = inbox.recv() => {
                    match frame {
                        Some(frame) => ws_sender.send(Message::text(frame.to_string())).await?,
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }

    /// Handle one text frame. Returns a rejection to send back, if any.
    async fn handle_text(&self, text: &str) -> Option<ServerFrame> {
        let frame = match ClientFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Rejected frame from {}: {e}", self.id);
                return Some(ServerFrame::rejected(None, e.to_string()));
            }
        };
        let mut event = match frame.to_event() {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Rejected {} from {}: {e}", frame.event, self.id);
                return Some(ServerFrame::rejected(Some(&frame.event), e.to_string()));
            }
        };
        self.stamp(&mut event);

        let outcome = match &event {
            BoardEvent::BoardJoin(p) => self.join(&p.board_id, &event).await,
            BoardEvent::BoardLeave(p) => {
                self.leave(&p.board_id).await;
                Ok(())
            }
            // Snapshots only come from the relay itself, via `RelayHandle`.
            BoardEvent::BoardUpdate(_) => Err("snapshots are published by the server only".to_string()),
            _ => {
                let joined = self.ctx.registry.rooms(self.id);
                match frame.target_room(&event, &joined) {
                    Ok(room) if joined.iter().any(|r| r == room) => self.relay(room, &event).await,
                    Ok(room) => Err(format!("not joined to board `{room}`")),
                    Err(e) => Err(e.to_string()),
                }
            }
        };

        match outcome {
            Ok(()) => None,
            Err(reason) => {
                log::warn!("Rejected {} from {}: {reason}", event.name(), self.id);
                Some(ServerFrame::rejected(Some(event.name()), reason))
            }
        }
    }

    /// Never trust the identity a client claims in presence payloads.
    fn stamp(&self, event: &mut BoardEvent) {
        match event {
            BoardEvent::BoardJoin(p) => p.user = self.identity.user(),
            BoardEvent::BoardLeave(p) => p.user_id = self.identity.user_id.clone(),
            BoardEvent::CursorMove(p) => {
                p.cursor.user_id = self.identity.user_id.clone();
                p.cursor.user_name = self.identity.name.clone();
            }
            BoardEvent::UserTyping(p) | BoardEvent::UserStopTyping(p) => {
                p.user_id = self.identity.user_id.clone();
            }
            _ => {}
        }
    }

    async fn join(&self, board_id: &str, event: &BoardEvent) -> Result<(), String> {
        if let Some(store) = &self.ctx.store {
            store
                .get_visible(board_id, &self.identity.user_id)
                .map_err(|e| e.to_string())?;
        }
        if self.ctx.registry.is_joined(self.id, board_id) {
            return Ok(());
        }
        self.ctx
            .broadcaster
            .join(board_id, self.id, &self.identity.user_id, self.outbox.clone())
            .await
            .map_err(|e| e.to_string())?;
        self.ctx.registry.join(self.id, board_id);
        log::info!("{} joined board {board_id}", self.identity.name);
        self.relay(board_id, event).await
    }

    async fn leave(&self, board_id: &str) {
        if !self.ctx.registry.leave(self.id, board_id) {
            return;
        }
        self.ctx.broadcaster.leave(board_id, self.id).await;
        log::info!("{} left board {board_id}", self.identity.name);
        self.announce_departure(board_id).await;
    }

    async fn relay(&self, board_id: &str, event: &BoardEvent) -> Result<(), String> {
        let frame = ServerFrame::event(&self.identity.user_id, board_id, event)
            .and_then(|f| f.encode())
            .map_err(|e| {
                log::error!("Failed to encode {}: {e}", event.name());
                e.to_string()
            })?;
        let delivered = self
            .ctx
            .broadcaster
            .broadcast(board_id, Arc::from(frame), Some(self.id))
            .await;
        if event.is_presence() {
            log::trace!("{} → {delivered} peers in {board_id}", event.name());
        } else {
            log::debug!("{} → {delivered} peers in {board_id}", event.name());
        }
        Ok(())
    }

    /// Peers see a user leave only once their last connection in the room
    /// is gone.
    async fn announce_departure(&self, board_id: &str) {
        if self.still_present(board_id).await {
            log::debug!("{} still connected to {board_id}", self.identity.name);
            return;
        }
        let event = BoardEvent::BoardLeave(LeavePayload {
            board_id: board_id.to_string(),
            user_id: self.identity.user_id.clone(),
        });
        // Best effort: nobody left to tell is fine.
        let _ = self.relay(board_id, &event).await;
    }

    async fn still_present(&self, board_id: &str) -> bool {
        match self.ctx.broadcaster.get(board_id).await {
            Some(room) => room
                .members()
                .await
                .iter()
                .any(|m| m.user_id == self.identity.user_id),
            None => false,
        }
    }

    /// Implicit leave from every joined room. Runs on every exit path.
    async fn cleanup(&self) {
        if let Some(departure) = self.ctx.registry.disconnect(self.id) {
            for board_id in &departure.rooms {
                self.ctx.broadcaster.leave(board_id, self.id).await;
                self.announce_departure(board_id).await;
            }
            log::info!(
                "{} disconnected; left {} rooms",
                departure.identity.name,
                departure.rooms.len()
            );
        }
    }
}

/// Pushes events into rooms on behalf of the snapshot collaborator.
#[derive(Clone)]
pub struct RelayHandle {
    broadcaster: Arc<Broadcaster>,
}

impl RelayHandle {
    /// Deliver `event` to every member of `board_id`. Returns how many
    /// sessions received it.
    pub async fn publish(&self, board_id: &str, event: &BoardEvent) -> Result<usize, ProtocolError> {
        let frame = ServerFrame::event(SERVER_ORIGIN, board_id, event)?.encode()?;
        Ok(self
            .broadcaster
            .broadcast(board_id, Arc::from(frame), None)
            .await)
    }
}
