//! WebSocket chat client: the presentation layer's side of the wire.
//!
//! Provides:
//! - One outbound connection per client, re-openable after a drop
//! - `send_chat` / `send_typing` toward the server
//! - A `ChatEvent` stream toward the UI (connected, disconnected, messages)
//! - Offline queue for chat typed while the link is down

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

use crate::election::Role;
use crate::error::RelayError;
use crate::protocol::{ClientMessage, Color, ServerMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Why the link to the server went down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Server sent a going-away close (it is shutting down).
    ServerGoingAway,
    /// Server closed with some other code.
    Closed { code: u16, reason: String },
    /// Stream ended without a close frame.
    ConnectionLost,
    Error(String),
    /// We closed it ourselves.
    Local,
}

impl DisconnectReason {
    pub fn should_reconnect(&self) -> bool {
        !matches!(self, DisconnectReason::Local)
    }
}

/// Events delivered to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Connected,
    Disconnected(DisconnectReason),
    Message(ServerMessage),
    /// A retry cycle is underway.
    Reconnecting { attempt: u32 },
    /// This process settled on a role.
    RoleElected(Role),
    /// The retry policy ran out of attempts.
    GaveUp,
}

/// Chat lines typed while disconnected, replayed in order on reconnect.
pub struct OfflineQueue {
    queue: VecDeque<String>,
    max_size: usize,
}

impl OfflineQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(64)),
            max_size,
        }
    }

    /// Returns `false` when full.
    pub fn enqueue(&mut self, text: String) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(text);
        true
    }

    pub fn drain(&mut self) -> Vec<String> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

/// The chat client.
///
/// Cheap to share behind an `Arc`: every method takes `&self`, so a
/// supervisor can reconnect while the UI keeps sending.
pub struct ChatClient {
    url: String,
    /// Bound on TCP connect plus WebSocket handshake.
    connect_timeout: Duration,
    state: Arc<RwLock<ConnectionState>>,
    /// Writer task inbox for the current connection. Cleared when the link
    /// drops so the writer exits with it.
    outgoing_tx: Arc<RwLock<Option<mpsc::Sender<Message>>>>,
    /// Also serializes "am I connected?" decisions against replay.
    offline_queue: Mutex<OfflineQueue>,
    /// Last identity the server assigned us.
    identity: Arc<RwLock<Option<(String, Color)>>>,
    /// Set by `disconnect()` so the reader reports a local close.
    closing: Arc<AtomicBool>,
    event_tx: mpsc::Sender<ChatEvent>,
    event_rx: std::sync::Mutex<Option<mpsc::Receiver<ChatEvent>>>,
}

impl ChatClient {
    pub fn new(url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            url: url.into(),
            connect_timeout: Duration::from_secs(5),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: Arc::new(RwLock::new(None)),
            offline_queue: Mutex::new(OfflineQueue::new(1_000)),
            identity: Arc::new(RwLock::new(None)),
            closing: Arc::new(AtomicBool::new(false)),
            event_tx,
            event_rx: std::sync::Mutex::new(Some(event_rx)),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&self) -> Option<mpsc::Receiver<ChatEvent>> {
        self.event_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    /// Open the connection and spawn its reader and writer tasks.
    ///
    /// Completion is also reported as `ChatEvent::Connected`; when the link
    /// later drops, `ChatEvent::Disconnected` follows.
    pub async fn connect(&self) -> Result<(), RelayError> {
        *self.state.write().await = ConnectionState::Connecting;
        self.closing.store(false, Ordering::SeqCst);

        let handshake = tokio_tungstenite::connect_async(self.url.as_str());
        let outcome = match tokio::time::timeout(self.connect_timeout, handshake).await {
            Ok(Ok((ws_stream, _))) => Ok(ws_stream),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("handshake timed out after {:?}", self.connect_timeout)),
        };
        let ws_stream = match outcome {
            Ok(ws_stream) => ws_stream,
            Err(reason) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(RelayError::TransportUnavailable {
                    addr: self.url.clone(),
                    reason,
                });
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(256);
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if ws_writer.send(msg).await.is_err() || is_close {
                    break;
                }
            }
        });
        *self.outgoing_tx.write().await = Some(out_tx.clone());

        // Going Connected and replaying happen under the queue lock, so a
        // concurrent send_chat either lands in the replay or follows it.
        {
            let mut queue = self.offline_queue.lock().await;
            *self.state.write().await = ConnectionState::Connected;
            let queued = queue.drain();
            if !queued.is_empty() {
                log::info!("Replaying {} queued chat lines", queued.len());
                for text in queued {
                    let _ = out_tx.send(Message::Text(ClientMessage::Chat(text).encode().into())).await;
                }
            }
        }
        let _ = self.event_tx.send(ChatEvent::Connected).await;
        log::info!("Connected to {}", self.url);

        // Reader task: decode server frames into events
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let outgoing = self.outgoing_tx.clone();
        let identity = self.identity.clone();
        let closing = self.closing.clone();
        tokio::spawn(async move {
            let reason = loop {
                match ws_reader.next().await {
                    Some(Ok(Message::Text(text))) => match ServerMessage::decode(text.as_str()) {
                        Ok(msg) => {
                            if let ServerMessage::Username { name, color } = &msg {
                                *identity.write().await = Some((name.clone(), *color));
                            }
                            let _ = event_tx.send(ChatEvent::Message(msg)).await;
                        }
                        Err(e) => log::warn!("Dropping malformed server message: {e}"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(f) if f.code == CloseCode::Away => DisconnectReason::ServerGoingAway,
                            Some(f) => DisconnectReason::Closed {
                                code: f.code.into(),
                                reason: f.reason.as_str().to_string(),
                            },
                            None => DisconnectReason::Closed {
                                code: CloseCode::Status.into(),
                                reason: String::new(),
                            },
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break DisconnectReason::Error(e.to_string()),
                    None => break DisconnectReason::ConnectionLost,
                }
            };
            let reason = if closing.load(Ordering::SeqCst) {
                DisconnectReason::Local
            } else {
                reason
            };

            // Connection lost. A newer connect() may already own the slot.
            {
                let mut slot = outgoing.write().await;
                if slot.as_ref().map_or(true, |tx| tx.same_channel(&out_tx)) {
                    *slot = None;
                    *state.write().await = ConnectionState::Disconnected;
                }
            }
            drop(out_tx);
            log::info!("Disconnected: {reason:?}");
            let _ = event_tx.send(ChatEvent::Disconnected(reason)).await;
        });

        Ok(())
    }

    /// Send a chat line. While the link is down the line is queued.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<(), RelayError> {
        let text = text.into();
        let mut queue = self.offline_queue.lock().await;
        if *self.state.read().await != ConnectionState::Connected {
            if !queue.enqueue(text) {
                return Err(RelayError::NotConnected);
            }
            return Ok(());
        }
        self.send(ClientMessage::Chat(text)).await
    }

    /// Announce typing state. Dropped silently while offline.
    pub async fn send_typing(&self, typing: bool) -> Result<(), RelayError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Ok(());
        }
        self.send(ClientMessage::Typing(typing)).await
    }

    async fn send(&self, msg: ClientMessage) -> Result<(), RelayError> {
        let tx = self.outgoing_tx.read().await.clone().ok_or(RelayError::NotConnected)?;
        tx.send(Message::Text(msg.encode().into()))
            .await
            .map_err(|_| RelayError::NotConnected)
    }

    /// Close the link on purpose; the resulting disconnect is `Local`.
    pub async fn disconnect(&self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(tx) = self.outgoing_tx.write().await.take() {
            let _ = tx.send(Message::Close(None)).await;
        }
    }

    pub(crate) async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn identity(&self) -> Option<(String, Color)> {
        self.identity.read().await.clone()
    }

    pub async fn offline_queue_len(&self) -> usize {
        self.offline_queue.lock().await.len()
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}
