//! WebSocket chat server: one session per accepted connection.
//!
//! Per connection:
//! ```text
//! Connecting ──handshake ok──► Open ──close / error / shutdown──► Closed
//!     │                          │                                  ▲
//!     └──handshake failed────────┼──────────────────────────────────┘
//!                                │
//!                   router.connect()  …  router.disconnect()
//! ```
//! Whatever ends the Open phase, the connection task falls out of its pump
//! loop into one cleanup call, and the router ignores repeats.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::error::RelayError;
use crate::history::{HistoryConfig, HistoryLog};
use crate::registry::SessionId;
use crate::router::{Admission, BroadcastRouter};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Lines buffered per session before a slow reader starts losing them
    pub broadcast_capacity: usize,
    /// Transcript location (None = no persistence)
    pub history: Option<HistoryConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7777".to_string(),
            broadcast_capacity: 1024,
            history: Some(HistoryConfig::default()),
        }
    }
}

impl ServerConfig {
    /// Ephemeral port, no transcript.
    pub fn for_testing() -> Self {
        Self {
            bind_addr: "127.0.0.1:0".to_string(),
            broadcast_capacity: 64,
            history: None,
        }
    }
}

/// Why a session's pump loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseCause {
    Peer,
    Error,
    Shutdown,
}

pub struct ChatServer {
    config: ServerConfig,
    router: Arc<BroadcastRouter>,
}

impl ChatServer {
    pub fn new(config: ServerConfig) -> Self {
        let history = config.history.clone().map(HistoryLog::new);
        let router = Arc::new(BroadcastRouter::new(config.broadcast_capacity, history));
        Self { config, router }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the listening socket. An occupied port maps to `PortInUse`.
    pub async fn bind(&self) -> Result<TcpListener, RelayError> {
        let addr = &self.config.bind_addr;
        let listener = TcpListener::bind(addr).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::AddrInUse => RelayError::PortInUse { addr: addr.clone() },
            _ => RelayError::Io(e),
        })?;

        // Transcript problems must not stop the server from serving.
        if let Some(history) = self.router.history() {
            if let Err(e) = history.open() {
                log::error!("History log unavailable, continuing without persistence: {e}");
            }
        }

        log::info!("Chat server listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Bind and serve until the process ends.
    pub async fn run(&self) -> Result<(), RelayError> {
        let listener = self.bind().await?;
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        Self::serve(listener, self.router.clone(), shutdown_rx).await;
        Ok(())
    }

    /// Bind, then serve on a background task until the handle shuts it down.
    pub async fn spawn(self) -> Result<ServerHandle, RelayError> {
        let listener = self.bind().await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let router = self.router.clone();
        let task = tokio::spawn(Self::serve(listener, router.clone(), shutdown_rx));

        Ok(ServerHandle {
            local_addr,
            router,
            shutdown_tx,
            task,
        })
    }

    async fn serve(
        listener: TcpListener,
        router: Arc<BroadcastRouter>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        log::debug!("New TCP connection from {addr}");
                        let router = router.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = Self::handle_connection(stream, addr, router, shutdown).await {
                                log::warn!("Connection error from {addr}: {e}");
                            }
                        });
                    }
                    Err(e) => log::warn!("Accept failed: {e}"),
                },
                _ = shutdown.changed() => break,
            }
        }
        log::info!("Chat server stopped accepting connections");
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        router: Arc<BroadcastRouter>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), RelayError> {
        let ws_stream = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                // Election probes land here: plain TCP, no upgrade.
                log::debug!("Handshake with {addr} not completed: {e}");
                return Ok(());
            }
        };

        let id = SessionId::new();
        let admission = router.connect(id).await;
        log::info!("WebSocket session {} opened from {addr}", admission.session.display_name);

        let result = Self::pump(ws_stream, id, admission, &router, shutdown).await;
        router.disconnect(id).await;

        match result {
            Ok(cause) => {
                log::debug!("Session {id} from {addr} closed ({cause:?})");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn pump(
        ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
        id: SessionId,
        admission: Admission,
        router: &BroadcastRouter,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<CloseCause, RelayError> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let Admission { greeting, mut receiver, .. } = admission;

        ws_sender.send(Message::Text(greeting.encode().into())).await?;

        loop {
            tokio::select! {
                msg = ws_receiver.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = router.dispatch(id, text.as_str()).await {
                            log::warn!("Dropped payload from {id}: {e}");
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_sender.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        log::warn!("Ignoring binary frame from {id}");
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(CloseCause::Peer),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::warn!("WebSocket error on {id}: {e}");
                        return Ok(CloseCause::Error);
                    }
                },

                line = receiver.recv() => match line {
                    Ok(line) => {
                        ws_sender.send(Message::Text(line.as_ref().into())).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("Session {id} lagged by {n} messages");
                        router.fanout().record_lag(n);
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(CloseCause::Shutdown),
                },

                _ = shutdown.changed() => {
                    let frame = CloseFrame {
                        code: CloseCode::Away,
                        reason: "server shutting down".into(),
                    };
                    // Best effort: the peer may already be gone.
                    let _ = ws_sender.send(Message::Close(Some(frame))).await;
                    return Ok(CloseCause::Shutdown);
                }
            }
        }
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn router(&self) -> &Arc<BroadcastRouter> {
        &self.router
    }
}

/// A server running on a background task.
pub struct ServerHandle {
    local_addr: SocketAddr,
    router: Arc<BroadcastRouter>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn router(&self) -> &Arc<BroadcastRouter> {
        &self.router
    }

    /// Stop accepting, send every session a going-away close, and wait for
    /// the listener to be released.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            log::warn!("Server task ended abnormally: {e}");
        }
        log::info!("Chat server on {} shut down", self.local_addr);
    }
}
