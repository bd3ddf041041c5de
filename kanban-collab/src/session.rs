//! Session Registry: who is connected, as whom, and in which rooms.
//!
//! A session exists only after its credential was verified. Joining and
//! leaving are idempotent. On disconnect the registry forgets the session and
//! hands its rooms back exactly once, so departure notices go out once.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use kanban_core::User;
use thiserror::Error;
use tokio_tungstenite::tungstenite::handshake::server::Request;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use uuid::Uuid;

/// Authenticated user behind a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub name: String,
    pub email: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            email: email.into(),
        }
    }

    pub fn user(&self) -> User {
        User::new(&self.user_id, &self.name, &self.email)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,
    #[error("invalid credential")]
    InvalidCredential,
}

/// Checks bearer credentials. The issuer lives outside the relay.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// In-memory token table.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.insert(token, identity);
        self
    }

    pub fn insert(&mut self, token: impl Into<String>, identity: Identity) {
        self.tokens.insert(token.into(), identity);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl CredentialVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidCredential)
    }
}

/// Bearer token from the upgrade request: `Authorization: Bearer …` first,
/// then a `token` query parameter.
pub fn token_from_request(request: &Request) -> Option<String> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = header {
        return Some(token.to_string());
    }

    request.uri().query().and_then(|query| {
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, value)| *key == "token" && !value.is_empty())
            .map(|(_, value)| value.to_string())
    })
}

#[derive(Debug)]
struct Session {
    identity: Identity,
    rooms: BTreeSet<String>,
}

/// Sessions that ended, as handed back by [`SessionRegistry::disconnect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub identity: Identity,
    pub rooms: Vec<String>,
}

pub struct SessionRegistry {
    verifier: Arc<dyn CredentialVerifier>,
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl SessionRegistry {
    pub fn new(verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self {
            verifier,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Verify the credential and open a session for `connection_id`.
    ///
    /// Nothing is recorded when verification fails.
    pub fn authenticate(&self, connection_id: Uuid, token: Option<&str>) -> Result<Identity, AuthError> {
        let token = token.ok_or(AuthError::MissingCredential)?;
        let identity = self.verifier.verify(token)?;

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(
            connection_id,
            Session {
                identity: identity.clone(),
                rooms: BTreeSet::new(),
            },
        );
        Ok(identity)
    }

    /// Returns `false` when already joined or when the session is unknown.
    pub fn join(&self, connection_id: Uuid, board_id: &str) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        match sessions.get_mut(&connection_id) {
            Some(session) => session.rooms.insert(board_id.to_string()),
            None => false,
        }
    }

    /// Returns `false` when the room was not joined.
    pub fn leave(&self, connection_id: Uuid, board_id: &str) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        match sessions.get_mut(&connection_id) {
            Some(session) => session.rooms.remove(board_id),
            None => false,
        }
    }

    /// Forget the session. Only the first call for a connection returns it.
    pub fn disconnect(&self, connection_id: Uuid) -> Option<Departure> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.remove(&connection_id).map(|session| Departure {
            identity: session.identity,
            rooms: session.rooms.into_iter().collect(),
        })
    }

    pub fn identity(&self, connection_id: Uuid) -> Option<Identity> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.get(&connection_id).map(|s| s.identity.clone())
    }

    /// Joined rooms, in board id order.
    pub fn rooms(&self, connection_id: Uuid) -> Vec<String> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(&connection_id)
            .map(|s| s.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_joined(&self, connection_id: Uuid, board_id: &str) -> bool {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(&connection_id)
            .is_some_and(|s| s.rooms.contains(board_id))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
