//! Session registry: connection id → display identity.
//!
//! The map and the connected count live behind one lock so that a
//! connect/disconnect is never observed half-applied.

use std::collections::HashMap;
use std::fmt;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::protocol::Color;

/// Opaque per-connection identifier assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One live connection's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub display_name: String,
    pub color: Color,
    /// Mirrors membership in the typing set; only the typing aggregator flips it.
    pub is_typing: bool,
}

#[derive(Debug, Default)]
struct RegistryState {
    sessions: HashMap<SessionId, Session>,
    connected_count: usize,
    /// Last sequence number handed out; names are never reused.
    sequence: u64,
}

/// Authoritative set of live sessions for one server instance.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    state: RwLock<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly opened connection.
    ///
    /// Assigns `User<n>` and a random color. Registering an id twice returns
    /// the existing session untouched.
    pub async fn register(&self, id: SessionId) -> Session {
        let mut state = self.state.write().await;
        if let Some(existing) = state.sessions.get(&id) {
            return existing.clone();
        }

        state.sequence += 1;
        let session = Session {
            id,
            display_name: format!("User{}", state.sequence),
            color: Color::random(),
            is_typing: false,
        };
        state.sessions.insert(id, session.clone());
        state.connected_count += 1;
        session
    }

    /// Remove a session. Unknown ids are a no-op returning `None`.
    pub async fn unregister(&self, id: SessionId) -> Option<Session> {
        let mut state = self.state.write().await;
        let removed = state.sessions.remove(&id)?;
        state.connected_count -= 1;
        Some(removed)
    }

    pub async fn lookup(&self, id: SessionId) -> Option<Session> {
        self.state.read().await.sessions.get(&id).cloned()
    }

    /// Resolve several ids under one read lock, preserving order and
    /// skipping ids that are gone.
    pub async fn lookup_many(&self, ids: &[SessionId]) -> Vec<Session> {
        let state = self.state.read().await;
        ids.iter().filter_map(|id| state.sessions.get(id).cloned()).collect()
    }

    /// Flip the typing flag. Returns `false` if the session is unknown.
    pub(crate) async fn set_typing_flag(&self, id: SessionId, typing: bool) -> bool {
        let mut state = self.state.write().await;
        match state.sessions.get_mut(&id) {
            Some(session) => {
                session.is_typing = typing;
                true
            }
            None => false,
        }
    }

    pub async fn connected_count(&self) -> usize {
        self.state.read().await.connected_count
    }

    /// Number of entries in the map (always equal to `connected_count`).
    pub async fn len(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Read count and entry total under the same lock.
    pub async fn counts(&self) -> (usize, usize) {
        let state = self.state.read().await;
        (state.connected_count, state.sessions.len())
    }

    pub async fn sessions(&self) -> Vec<Session> {
        self.state.read().await.sessions.values().cloned().collect()
    }
}
