//! Turns chat events into terminal lines and terminal lines into commands.

use murmur_relay::{ChatEvent, DisconnectReason, Role, ServerMessage};

/// What the user asked for with one line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Chat(String),
    Typing(bool),
    Quit,
    /// Blank line or an unrecognized command.
    Nothing,
}

pub fn parse_input(line: &str) -> Input {
    let trimmed = line.trim();
    match trimmed {
        "" => Input::Nothing,
        "/quit" | "/exit" => Input::Quit,
        "/typing on" => Input::Typing(true),
        "/typing off" => Input::Typing(false),
        cmd if cmd.starts_with('/') && !cmd.starts_with("//") => Input::Nothing,
        // "//text" sends "/text".
        text => Input::Chat(text.strip_prefix('/').unwrap_or(text).to_string()),
    }
}

/// Status lines are prefixed with `*` so they stand apart from chat.
pub fn render(event: &ChatEvent) -> Option<String> {
    match event {
        ChatEvent::Connected => Some("* connected".to_string()),
        ChatEvent::Disconnected(DisconnectReason::Local) => None,
        ChatEvent::Disconnected(DisconnectReason::ServerGoingAway) => {
            Some("* server left, looking for a new one".to_string())
        }
        ChatEvent::Disconnected(reason) => Some(format!("* connection lost ({reason:?})")),
        ChatEvent::Reconnecting { attempt } => Some(format!("* reconnecting (attempt {attempt})")),
        ChatEvent::RoleElected(Role::Server) => Some("* hosting the chat server".to_string()),
        ChatEvent::RoleElected(Role::Client) => None,
        ChatEvent::GaveUp => Some("* could not reach any server, giving up".to_string()),
        ChatEvent::Message(msg) => render_message(msg),
    }
}

fn render_message(msg: &ServerMessage) -> Option<String> {
    match msg {
        ServerMessage::Online(n) => Some(format!("* {n} online")),
        ServerMessage::Username { name, color } => Some(format!("* you are {name} (#{color})")),
        ServerMessage::Writing(names) => match names.as_slice() {
            [] => None,
            [one] => Some(format!("* {one} is typing...")),
            many => Some(format!("* {} are typing...", many.join(", "))),
        },
        ServerMessage::Chat(line) => Some(line.clone()),
    }
}
