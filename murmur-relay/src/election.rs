//! Peer election and reconnect supervision.
//!
//! ```text
//! start ──► probe addr ──reachable──────────────────────► Client
//!               │
//!               └─refused──► bind addr ──ok──► Server (+ local Client)
//!                                │
//!                                └─in use──► Client (someone else won)
//!
//! link lost ──► wait(backoff) ──► probe ──► [elect] ──► connect ──┐
//!     ▲                                                            │
//!     └──────────────────────── failed ────────────────────────────┘
//! ```
//!
//! A supervisor task owns the retry loop, so there is never more than one
//! election/reconnect cycle in flight per peer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::client::{ChatClient, ChatEvent, ConnectionState};
use crate::error::RelayError;
use crate::server::{ChatServer, ServerConfig, ServerHandle};

/// Which side of the relay this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Delay schedule between reconnect attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    /// Growth per attempt; 1 keeps the delay fixed.
    pub multiplier: u32,
    pub max_delay: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 1,
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            multiplier: 1,
            max_delay: delay,
            max_attempts: None,
        }
    }

    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial_delay: initial,
            multiplier: 2,
            max_delay: max,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Delay before attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay.max(self.initial_delay))
    }

    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max)
    }
}

/// Peer configuration.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Well-known `host:port` every peer probes and the winner binds
    pub addr: String,
    /// How long a probe may take before the address counts as unreachable
    pub probe_timeout: Duration,
    /// Bound on each WebSocket connect attempt
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Settings used when this peer ends up hosting (its bind address is
    /// overridden by `addr`)
    pub server: ServerConfig,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:7777".to_string(),
            probe_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
            server: ServerConfig::default(),
        }
    }
}

impl PeerConfig {
    /// Short timings and no transcript.
    pub fn for_testing(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            probe_timeout: Duration::from_millis(200),
            connect_timeout: Duration::from_secs(1),
            reconnect: ReconnectPolicy::fixed(Duration::from_millis(50)),
            server: ServerConfig::for_testing(),
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.addr.clone(),
            ..self.server.clone()
        }
    }
}

/// Outcome of one election round.
pub struct Election {
    pub role: Role,
    /// Present when this process won and is now hosting.
    pub server: Option<ServerHandle>,
}

/// Raw TCP reachability check of the server address.
pub async fn probe(addr: &str, timeout: Duration) -> Result<(), RelayError> {
    let unavailable = |reason: String| RelayError::TransportUnavailable {
        addr: addr.to_string(),
        reason,
    };
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(unavailable(e.to_string())),
        Err(_) => Err(unavailable(format!("no answer within {timeout:?}"))),
    }
}

/// Probe, and host the server if nobody answers.
///
/// Losing the bind race is not an error: it means another process became
/// the server first.
pub async fn elect(config: &ServerConfig, probe_timeout: Duration) -> Result<Election, RelayError> {
    if probe(&config.bind_addr, probe_timeout).await.is_ok() {
        log::info!("Server found at {}, joining as client", config.bind_addr);
        return Ok(Election { role: Role::Client, server: None });
    }

    log::info!("No server at {}, starting one", config.bind_addr);
    match ChatServer::new(config.clone()).spawn().await {
        Ok(handle) => Ok(Election { role: Role::Server, server: Some(handle) }),
        Err(RelayError::PortInUse { addr }) => {
            log::info!("{addr} taken by another peer, falling back to client");
            Ok(Election { role: Role::Client, server: None })
        }
        Err(e) => Err(e),
    }
}

/// Holds the single-flight flag for one reconnect cycle; released on drop,
/// including when the cycle's future is cancelled.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| CycleGuard(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct PeerInner {
    config: PeerConfig,
    client: ChatClient,
    role: RwLock<Role>,
    server: Mutex<Option<ServerHandle>>,
    /// Guards the retry loop against concurrent entry.
    reconnecting: AtomicBool,
    app_tx: mpsc::Sender<ChatEvent>,
    shutdown_tx: watch::Sender<bool>,
}

/// A chat endpoint that hosts the relay when it has to.
///
/// This is the whole surface the presentation layer uses: events come out
/// of the receiver returned by [`Peer::start`], and text goes in through
/// [`send_chat`](Peer::send_chat) / [`send_typing`](Peer::send_typing).
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

impl Peer {
    /// Elect a role, connect, and start supervising the link.
    pub async fn start(config: PeerConfig) -> Result<(Peer, mpsc::Receiver<ChatEvent>), RelayError> {
        let client = ChatClient::new(config.url()).with_connect_timeout(config.connect_timeout);
        let client_rx = client
            .take_event_rx()
            .ok_or(RelayError::NotConnected)?;
        let (app_tx, app_rx) = mpsc::channel(256);
        let (shutdown_tx, _) = watch::channel(false);

        let peer = Peer {
            inner: Arc::new(PeerInner {
                config,
                client,
                role: RwLock::new(Role::Client),
                server: Mutex::new(None),
                reconnecting: AtomicBool::new(false),
                app_tx,
                shutdown_tx,
            }),
        };

        // Failures here are retried by the supervisor, never returned.
        let connected = match peer.run_election().await {
            Ok(_) => match peer.inner.client.connect().await {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Initial connect failed: {e}");
                    false
                }
            },
            Err(e) => {
                log::warn!("Initial election failed: {e}");
                false
            }
        };

        peer.spawn_supervisor(client_rx, connected);
        Ok((peer, app_rx))
    }

    fn spawn_supervisor(
        &self,
        mut client_rx: mpsc::Receiver<ChatEvent>,
        connected: bool,
    ) -> JoinHandle<()> {
        let peer = self.clone();
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        tokio::spawn(async move {
            if !connected {
                peer.reconnect().await;
            }

            loop {
                tokio::select! {
                    event = client_rx.recv() => {
                        let Some(event) = event else { break };
                        let lost = matches!(&event, ChatEvent::Disconnected(reason) if reason.should_reconnect());
                        let _ = peer.inner.app_tx.send(event).await;
                        if lost && !*shutdown.borrow() {
                            peer.reconnect().await;
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }

            // Flush whatever the client emitted while shutting down.
            while let Ok(event) = client_rx.try_recv() {
                let _ = peer.inner.app_tx.send(event).await;
            }
        })
    }

    /// One election round; hosts the server on a win.
    async fn run_election(&self) -> Result<Role, RelayError> {
        let inner = &self.inner;
        let mut server = inner.server.lock().await;

        // Our own server stopped answering: release it before rebinding.
        if let Some(stale) = server.take() {
            stale.shutdown().await;
        }

        let election = elect(&inner.config.server_config(), inner.config.probe_timeout).await?;
        *server = election.server;
        *inner.role.write().await = election.role;
        drop(server);

        let _ = inner.app_tx.send(ChatEvent::RoleElected(election.role)).await;
        Ok(election.role)
    }

    fn is_shut_down(&self) -> bool {
        *self.inner.shutdown_tx.borrow()
    }

    /// Retry until connected or the policy gives up.
    ///
    /// Returns `false` without doing anything if a cycle is already running
    /// or the peer has been shut down, and `true` right away if the link is
    /// already up.
    pub async fn reconnect(&self) -> bool {
        let inner = &self.inner;
        if self.is_shut_down() {
            return false;
        }
        if inner.client.connection_state().await == ConnectionState::Connected {
            return true;
        }
        let Some(_cycle) = CycleGuard::acquire(&inner.reconnecting) else {
            return false;
        };

        let policy = inner.config.reconnect.clone();
        let mut shutdown = inner.shutdown_tx.subscribe();
        let mut attempt = 0;

        let connected = loop {
            if self.is_shut_down() {
                break false;
            }
            attempt += 1;
            if !policy.allows(attempt) {
                log::error!("Giving up after {} reconnect attempts", attempt - 1);
                let _ = inner.app_tx.send(ChatEvent::GaveUp).await;
                break false;
            }

            inner.client.set_state(ConnectionState::Reconnecting).await;
            let _ = inner.app_tx.send(ChatEvent::Reconnecting { attempt }).await;

            tokio::select! {
                _ = tokio::time::sleep(policy.delay_for(attempt)) => {}
                _ = shutdown.wait_for(|stopped| *stopped) => break false,
            }

            if probe(&inner.config.addr, inner.config.probe_timeout).await.is_err() {
                if let Err(e) = self.run_election().await {
                    log::warn!("Election attempt {attempt} failed: {e}");
                    continue;
                }
            }
            if self.is_shut_down() {
                break false;
            }

            match inner.client.connect().await {
                Ok(()) => break true,
                Err(e) if e.is_transport() => log::warn!("Reconnect attempt {attempt} failed: {e}"),
                Err(e) => log::error!("Reconnect attempt {attempt} failed unexpectedly: {e}"),
            }
        };

        // Shutdown may have landed mid-attempt: undo what the attempt built.
        if self.is_shut_down() {
            inner.client.disconnect().await;
            if let Some(server) = inner.server.lock().await.take() {
                server.shutdown().await;
            }
            inner.client.set_state(ConnectionState::Disconnected).await;
            return false;
        }
        if !connected {
            inner.client.set_state(ConnectionState::Disconnected).await;
        }
        connected
    }

    pub async fn send_chat(&self, text: impl Into<String>) -> Result<(), RelayError> {
        self.inner.client.send_chat(text).await
    }

    pub async fn send_typing(&self, typing: bool) -> Result<(), RelayError> {
        self.inner.client.send_typing(typing).await
    }

    pub async fn role(&self) -> Role {
        *self.inner.role.read().await
    }

    /// Whether this process currently hosts the relay.
    pub async fn is_hosting(&self) -> bool {
        self.inner.server.lock().await.is_some()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.client.connection_state().await
    }

    pub fn client(&self) -> &ChatClient {
        &self.inner.client
    }

    pub fn config(&self) -> &PeerConfig {
        &self.inner.config
    }

    /// Leave the chat. A hosted server closes every session with a
    /// going-away frame, which sends the other peers into takeover.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        self.inner.client.disconnect().await;
        if let Some(server) = self.inner.server.lock().await.take() {
            server.shutdown().await;
        }
    }
}
