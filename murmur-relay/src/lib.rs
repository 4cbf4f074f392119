//! # murmur-relay: real-time chat relay with self-electing server
//!
//! Every peer speaks a small text protocol over one WebSocket. Whichever
//! peer finds no server on the well-known address binds it and becomes the
//! relay; everyone else (including the host itself) connects as a client.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌──────────────────┐
//! │ ChatClient  │ ◄─────────────────► │ ChatServer       │
//! │ (per peer)  │     text frames     │ (elected peer)   │
//! └──────┬──────┘                     └────────┬─────────┘
//!        │                                     │
//!        ▼                                     ▼
//! ┌─────────────┐                     ┌──────────────────┐
//! │ Peer        │                     │ BroadcastRouter  │
//! │ (election + │                     │  ├ SessionRegistry│
//! │  reconnect) │                     │  ├ TypingAggregator
//! └─────────────┘                     │  ├ HistoryLog    │
//!                                     │  └ BroadcastGroup│
//!                                     └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: text wire protocol (`online:`, `username:`, `writing:`, chat)
//! - [`registry`]: connection id → display identity
//! - [`typing`]: ordered "currently typing" set
//! - [`history`]: append-only transcript file
//! - [`broadcast`]: fan-out channel to every live session
//! - [`router`]: classifies inbound payloads and drives the side effects
//! - [`server`]: server-role connection lifecycle
//! - [`client`]: client-role connection lifecycle with offline queue
//! - [`election`]: startup election and reconnect/takeover supervisor

pub mod error;
pub mod protocol;
pub mod registry;
pub mod typing;
pub mod history;
pub mod broadcast;
pub mod router;
pub mod server;
pub mod client;
pub mod election;

// Re-exports for convenience
pub use error::RelayError;
pub use protocol::{ClientMessage, Color, ProtocolError, ServerMessage};
pub use registry::{Session, SessionId, SessionRegistry};
pub use typing::TypingAggregator;
pub use history::{HistoryConfig, HistoryError, HistoryLog, HistoryRecord};
pub use broadcast::{BroadcastGroup, BroadcastStats};
pub use router::{Admission, BroadcastRouter};
pub use server::{ChatServer, ServerConfig, ServerHandle};
pub use client::{ChatClient, ChatEvent, ConnectionState, DisconnectReason, OfflineQueue};
pub use election::{elect, probe, Election, Peer, PeerConfig, ReconnectPolicy, Role};
