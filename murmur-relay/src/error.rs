//! Relay-wide error taxonomy.
//!
//! Only transport failures (`TransportUnavailable`, `PortInUse`) ever leave
//! the relay; the peer supervisor turns them into election or retry.
//! Everything else is recovered where it happens and logged.

use thiserror::Error;

use crate::history::HistoryError;
use crate::protocol::ProtocolError;
use crate::registry::SessionId;

#[derive(Error, Debug)]
pub enum RelayError {
    /// Probe or connect to the server address failed.
    #[error("transport unavailable at {addr}: {reason}")]
    TransportUnavailable { addr: String, reason: String },

    /// Someone else already listens on the election address.
    #[error("port already in use: {addr}")]
    PortInUse { addr: String },

    #[error("persistence failure: {0}")]
    Persistence(#[from] HistoryError),

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("malformed control message: {0}")]
    MalformedControlMessage(String),

    #[error("not connected")]
    NotConnected,

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProtocolError> for RelayError {
    fn from(e: ProtocolError) -> Self {
        RelayError::MalformedControlMessage(e.to_string())
    }
}

impl RelayError {
    /// Whether the peer supervisor should answer this error with another
    /// election round instead of giving up.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RelayError::TransportUnavailable { .. }
                | RelayError::PortInUse { .. }
                | RelayError::WebSocket(_)
                | RelayError::Io(_)
        )
    }
}
