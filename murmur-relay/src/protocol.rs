//! Text protocol spoken over the WebSocket.
//!
//! Wire format (one text frame per message):
//! ```text
//! server → all      online:<n>
//! server → one      username:<name>:<RRGGBB>
//! server → all      writing:no | writing:<name1>:<name2>:...
//! client → server   writing:yes | writing:no
//! either way        <anything else>   (chat line)
//! ```
//!
//! Chat lines are decorated by the server only (`"<name>: <text>"`); clients
//! send raw text and render what they receive verbatim.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

const ONLINE_PREFIX: &str = "online:";
const USERNAME_PREFIX: &str = "username:";
const WRITING_PREFIX: &str = "writing:";
const NOBODY: &str = "no";

/// Decode failures for payloads carrying a recognized control prefix.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid online count: {0:?}")]
    InvalidOnlineCount(String),
    #[error("invalid username assignment: {0:?}")]
    InvalidUsername(String),
    #[error("invalid color: {0:?}")]
    InvalidColor(String),
    #[error("invalid typing state: {0:?}")]
    InvalidTypingState(String),
}

/// 24-bit display color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color(u32);

impl Color {
    pub const MAX: u32 = 0xFF_FFFF;

    /// Wrap a raw value, keeping only the low 24 bits.
    pub fn new(rgb: u32) -> Self {
        Self(rgb & Self::MAX)
    }

    /// Draw a color uniformly from the full 24-bit range.
    ///
    /// The low three bytes of a v4 UUID are all random bits.
    pub fn random() -> Self {
        Self::new((Uuid::new_v4().as_u128() & Self::MAX as u128) as u32)
    }

    pub fn rgb(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06X}", self.0)
    }
}

impl FromStr for Color {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.strip_prefix('#').unwrap_or(s);
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ProtocolError::InvalidColor(s.to_string()));
        }
        u32::from_str_radix(hex, 16)
            .map(Color::new)
            .map_err(|_| ProtocolError::InvalidColor(s.to_string()))
    }
}

/// Messages emitted by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Current connected count (broadcast).
    Online(usize),
    /// Identity assigned to the receiving session (unicast).
    Username { name: String, color: Color },
    /// Ordered names of sessions currently typing; empty means nobody.
    Writing(Vec<String>),
    /// Already-decorated chat or notice line.
    Chat(String),
}

impl ServerMessage {
    pub fn encode(&self) -> String {
        match self {
            ServerMessage::Online(n) => format!("{ONLINE_PREFIX}{n}"),
            ServerMessage::Username { name, color } => {
                format!("{USERNAME_PREFIX}{name}:{color}")
            }
            ServerMessage::Writing(names) if names.is_empty() => {
                format!("{WRITING_PREFIX}{NOBODY}")
            }
            ServerMessage::Writing(names) => format!("{WRITING_PREFIX}{}", names.join(":")),
            ServerMessage::Chat(text) => text.clone(),
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        if let Some(rest) = text.strip_prefix(ONLINE_PREFIX) {
            return rest
                .parse::<usize>()
                .map(ServerMessage::Online)
                .map_err(|_| ProtocolError::InvalidOnlineCount(rest.to_string()));
        }

        if let Some(rest) = text.strip_prefix(USERNAME_PREFIX) {
            let (name, color) = rest
                .rsplit_once(':')
                .ok_or_else(|| ProtocolError::InvalidUsername(rest.to_string()))?;
            if name.is_empty() {
                return Err(ProtocolError::InvalidUsername(rest.to_string()));
            }
            return Ok(ServerMessage::Username {
                name: name.to_string(),
                color: color.parse()?,
            });
        }

        if let Some(rest) = text.strip_prefix(WRITING_PREFIX) {
            if rest == NOBODY {
                return Ok(ServerMessage::Writing(Vec::new()));
            }
            let names: Vec<String> = rest.split(':').map(str::to_string).collect();
            if names.iter().any(|n| n.is_empty()) {
                return Err(ProtocolError::InvalidTypingState(rest.to_string()));
            }
            return Ok(ServerMessage::Writing(names));
        }

        Ok(ServerMessage::Chat(text.to_string()))
    }
}

/// Messages sent by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Typing(bool),
    Chat(String),
}

impl ClientMessage {
    pub fn encode(&self) -> String {
        match self {
            ClientMessage::Typing(true) => format!("{WRITING_PREFIX}yes"),
            ClientMessage::Typing(false) => format!("{WRITING_PREFIX}{NOBODY}"),
            ClientMessage::Chat(text) => text.clone(),
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        match text.strip_prefix(WRITING_PREFIX) {
            Some("yes") => Ok(ClientMessage::Typing(true)),
            Some(NOBODY) => Ok(ClientMessage::Typing(false)),
            Some(other) => Err(ProtocolError::InvalidTypingState(other.to_string())),
            None => Ok(ClientMessage::Chat(text.to_string())),
        }
    }
}

/// Server-side decoration of a chat line.
pub fn chat_line(name: &str, text: &str) -> String {
    format!("{name}: {text}")
}

pub fn connected_line(name: &str) -> String {
    format!("{name} connected")
}

pub fn disconnected_line(name: &str) -> String {
    format!("{name} disconnected")
}
