//! Broadcast router: the single entry point for every session event.
//!
//! ```text
//! connection task ──► connect / dispatch / disconnect
//!                            │  (entry gate: one event at a time)
//!                            ├──► SessionRegistry
//!                            ├──► TypingAggregator
//!                            ├──► HistoryLog        (no registry/typing lock held)
//!                            └──► BroadcastGroup ──► every session
//! ```
//!
//! Each event is classified, applied and fanned out completely before the
//! next one enters, so transcript order and broadcast order agree.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::broadcast::{BroadcastGroup, BroadcastStats};
use crate::error::RelayError;
use crate::history::HistoryLog;
use crate::protocol::{self, ClientMessage, ServerMessage};
use crate::registry::{Session, SessionId, SessionRegistry};
use crate::typing::TypingAggregator;

/// What a newly admitted session needs to start pumping.
pub struct Admission {
    pub session: Session,
    /// Unicast identity assignment, sent only to this session.
    pub greeting: ServerMessage,
    /// Subscribed before the `online:` broadcast, so it sees its own arrival.
    pub receiver: broadcast::Receiver<Arc<str>>,
}

pub struct BroadcastRouter {
    registry: Arc<SessionRegistry>,
    typing: TypingAggregator,
    history: Option<HistoryLog>,
    fanout: BroadcastGroup,
    /// Serializes event processing across sessions.
    gate: Mutex<()>,
}

impl BroadcastRouter {
    pub fn new(broadcast_capacity: usize, history: Option<HistoryLog>) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        Self {
            typing: TypingAggregator::new(registry.clone()),
            registry,
            history,
            fanout: BroadcastGroup::new(broadcast_capacity),
            gate: Mutex::new(()),
        }
    }

    /// Admit a session whose transport just opened.
    pub async fn connect(&self, id: SessionId) -> Admission {
        let _turn = self.gate.lock().await;

        let session = self.registry.register(id).await;
        let receiver = self.fanout.subscribe();
        let online = self.registry.connected_count().await;

        self.fanout.broadcast(&ServerMessage::Online(online));
        let notice = protocol::connected_line(&session.display_name);
        self.persist(&notice);
        self.fanout.broadcast(&ServerMessage::Chat(notice));

        log::info!(
            "{} connected as {} ({} online)",
            id,
            session.display_name,
            online
        );

        Admission {
            greeting: ServerMessage::Username {
                name: session.display_name.clone(),
                color: session.color,
            },
            session,
            receiver,
        }
    }

    /// Classify one inbound payload and apply it.
    ///
    /// Malformed control payloads are rejected without side effects; the
    /// caller keeps the connection open. Payloads from sessions that are
    /// already gone are ignored.
    pub async fn dispatch(&self, id: SessionId, payload: &str) -> Result<(), RelayError> {
        let message = ClientMessage::decode(payload)?;
        let _turn = self.gate.lock().await;

        let Some(session) = self.registry.lookup(id).await else {
            log::debug!("Dropping payload from unknown session {id}");
            return Ok(());
        };

        match message {
            ClientMessage::Typing(typing) => {
                let typing_now = self.typing.set_typing(id, typing).await;
                log::trace!("{} typing={} ({} typing)", session.display_name, typing, typing_now.len());
                self.fanout.broadcast(&writing_message(&typing_now));
            }
            ClientMessage::Chat(text) if text.trim().is_empty() => {
                log::debug!("Ignoring empty chat from {}", session.display_name);
            }
            ClientMessage::Chat(text) => {
                let line = protocol::chat_line(&session.display_name, &text);
                self.persist(&line);
                self.fanout.broadcast(&ServerMessage::Chat(line));
            }
        }
        Ok(())
    }

    /// Run the close path for a session. Safe to call more than once; only
    /// the first call for a live session has any effect.
    pub async fn disconnect(&self, id: SessionId) -> Option<Session> {
        let _turn = self.gate.lock().await;

        self.registry.lookup(id).await?;
        let typing_now = self.typing.clear_on_disconnect(id).await;
        let session = self.registry.unregister(id).await?;
        let online = self.registry.connected_count().await;

        self.fanout.broadcast(&writing_message(&typing_now));
        let notice = protocol::disconnected_line(&session.display_name);
        self.persist(&notice);
        self.fanout.broadcast(&ServerMessage::Chat(notice));
        self.fanout.broadcast(&ServerMessage::Online(online));

        log::info!("{} ({}) disconnected ({} online)", session.display_name, id, online);
        Some(session)
    }

    /// Write to the transcript; failure degrades to broadcast-only.
    fn persist(&self, text: &str) {
        if let Some(history) = &self.history {
            if let Err(e) = history.append(text) {
                log::error!("Failed to persist history line: {e}");
            }
        }
    }

    /// Observe every broadcast, as a session would.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.fanout.subscribe()
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn typing(&self) -> &TypingAggregator {
        &self.typing
    }

    pub fn history(&self) -> Option<&HistoryLog> {
        self.history.as_ref()
    }

    pub fn fanout(&self) -> &BroadcastGroup {
        &self.fanout
    }

    pub fn stats(&self) -> BroadcastStats {
        self.fanout.stats()
    }
}

fn writing_message(typing: &[Session]) -> ServerMessage {
    ServerMessage::Writing(typing.iter().map(|s| s.display_name.clone()).collect())
}
