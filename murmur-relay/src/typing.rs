//! Typing presence: who is composing a message right now.
//!
//! Keeps an insertion-ordered set of session ids and mirrors membership
//! into each session's `is_typing` flag. Every toggle returns the snapshot
//! it produced, taken while the set is still locked, so two concurrent
//! toggles can never yield a mixed view.
//!
//! Lock order is always typing set → registry; the registry never reaches
//! back into this module.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::registry::{Session, SessionId, SessionRegistry};

pub struct TypingAggregator {
    registry: Arc<SessionRegistry>,
    typing: Mutex<Vec<SessionId>>,
}

impl TypingAggregator {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            typing: Mutex::new(Vec::new()),
        }
    }

    /// Add or remove `id` and return the ordered list of typing sessions.
    ///
    /// Repeating the same toggle is idempotent. Unknown sessions leave the
    /// set untouched.
    pub async fn set_typing(&self, id: SessionId, typing: bool) -> Vec<Session> {
        let mut set = self.typing.lock().await;

        if self.registry.set_typing_flag(id, typing).await {
            let present = set.contains(&id);
            if typing && !present {
                set.push(id);
            } else if !typing && present {
                set.retain(|s| *s != id);
            }
        } else {
            log::debug!("Typing toggle from unknown session {id} ignored");
        }

        self.registry.lookup_many(&set).await
    }

    /// Drop `id` unconditionally; close implies not typing.
    pub async fn clear_on_disconnect(&self, id: SessionId) -> Vec<Session> {
        let mut set = self.typing.lock().await;
        set.retain(|s| *s != id);
        self.registry.set_typing_flag(id, false).await;
        self.registry.lookup_many(&set).await
    }

    pub async fn snapshot(&self) -> Vec<Session> {
        let set = self.typing.lock().await;
        self.registry.lookup_many(&set).await
    }

    pub async fn is_typing(&self, id: SessionId) -> bool {
        self.typing.lock().await.contains(&id)
    }
}
