//! End-to-end tests over real WebSocket connections.
//!
//! Each test spawns a server on an ephemeral port and connects real
//! clients, checking what they receive and what ends up in the transcript.

use futures_util::{SinkExt, StreamExt};
use murmur_relay::client::{ChatClient, ChatEvent, ConnectionState, DisconnectReason};
use murmur_relay::history::{HistoryConfig, HistoryLog};
use murmur_relay::protocol::ServerMessage;
use murmur_relay::server::{ChatServer, ServerConfig, ServerHandle};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;

async fn start_test_server(config: ServerConfig) -> (ServerHandle, String) {
    let handle = ChatServer::new(config).spawn().await.unwrap();
    let url = format!("ws://{}/", handle.local_addr());
    (handle, url)
}

/// Connect a client, draining the Connected event.
async fn connect_client(url: &str) -> (ChatClient, mpsc::Receiver<ChatEvent>) {
    let client = ChatClient::new(url);
    let mut events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();
    match timeout(Duration::from_secs(2), events.recv()).await {
        Ok(Some(ChatEvent::Connected)) => {}
        other => panic!("Expected Connected event, got {other:?}"),
    }
    (client, events)
}

/// Next server message, skipping lifecycle events.
async fn next_message(events: &mut mpsc::Receiver<ChatEvent>) -> ServerMessage {
    loop {
        match timeout(Duration::from_secs(2), events.recv()).await {
            Ok(Some(ChatEvent::Message(msg))) => return msg,
            Ok(Some(_)) => continue,
            other => panic!("Expected a server message, got {other:?}"),
        }
    }
}

/// Read messages until one matches, returning it.
async fn wait_for(
    events: &mut mpsc::Receiver<ChatEvent>,
    wanted: impl Fn(&ServerMessage) -> bool,
) -> ServerMessage {
    loop {
        let msg = next_message(events).await;
        if wanted(&msg) {
            return msg;
        }
    }
}

#[tokio::test]
async fn test_first_client_greeting_sequence() {
    let (server, url) = start_test_server(ServerConfig::for_testing()).await;
    let (client, mut events) = connect_client(&url).await;

    match next_message(&mut events).await {
        ServerMessage::Username { name, .. } => assert_eq!(name, "User1"),
        other => panic!("Expected username first, got {other:?}"),
    }
    assert_eq!(next_message(&mut events).await, ServerMessage::Online(1));
    assert_eq!(next_message(&mut events).await, ServerMessage::Chat("User1 connected".into()));

    let (name, _) = client.identity().await.unwrap();
    assert_eq!(name, "User1");
    server.shutdown().await;
}

#[tokio::test]
async fn test_second_client_gets_own_identity_and_count() {
    let (server, url) = start_test_server(ServerConfig::for_testing()).await;
    let (_c1, mut events1) = connect_client(&url).await;
    wait_for(&mut events1, |m| *m == ServerMessage::Online(1)).await;

    let (_c2, mut events2) = connect_client(&url).await;
    match next_message(&mut events2).await {
        ServerMessage::Username { name, .. } => assert_eq!(name, "User2"),
        other => panic!("Expected username first, got {other:?}"),
    }
    assert_eq!(next_message(&mut events2).await, ServerMessage::Online(2));

    // The first client sees the arrival but never the second greeting.
    assert_eq!(next_message(&mut events1).await, ServerMessage::Chat("User1 connected".into()));
    assert_eq!(next_message(&mut events1).await, ServerMessage::Online(2));
    assert_eq!(next_message(&mut events1).await, ServerMessage::Chat("User2 connected".into()));
    server.shutdown().await;
}

#[tokio::test]
async fn test_chat_reaches_everyone_and_history() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        history: Some(HistoryConfig::for_testing(dir.path().join("HistoricLog"))),
        ..ServerConfig::for_testing()
    };
    let (server, url) = start_test_server(config).await;

    let (c1, mut events1) = connect_client(&url).await;
    let (_c2, mut events2) = connect_client(&url).await;
    wait_for(&mut events1, |m| *m == ServerMessage::Chat("User2 connected".into())).await;
    wait_for(&mut events2, |m| *m == ServerMessage::Chat("User2 connected".into())).await;

    c1.send_chat("hello").await.unwrap();
    let expected = ServerMessage::Chat("User1: hello".into());
    assert_eq!(wait_for(&mut events1, |m| matches!(m, ServerMessage::Chat(_))).await, expected);
    assert_eq!(wait_for(&mut events2, |m| matches!(m, ServerMessage::Chat(_))).await, expected);

    let path = server.router().history().unwrap().path();
    let records = HistoryLog::replay(&path).unwrap();
    let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(texts, vec!["User1 connected", "User2 connected", "User1: hello"]);

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.lines().last().unwrap().ends_with(" - User1: hello"));
    server.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_announced_once() {
    let (server, url) = start_test_server(ServerConfig::for_testing()).await;
    let (c1, _events1) = connect_client(&url).await;
    let (_c2, mut events2) = connect_client(&url).await;
    wait_for(&mut events2, |m| *m == ServerMessage::Online(2)).await;

    c1.disconnect().await;
    assert_eq!(
        wait_for(&mut events2, |m| matches!(m, ServerMessage::Chat(t) if t.contains("disconnected"))).await,
        ServerMessage::Chat("User1 disconnected".into())
    );
    assert_eq!(next_message(&mut events2).await, ServerMessage::Online(1));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.router().registry().counts().await, (1, 1));
    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_control_keeps_connection() {
    let (server, url) = start_test_server(ServerConfig::for_testing()).await;
    let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let (mut tx, mut rx) = ws.split();

    tx.send(Message::Text("writing:maybe".into())).await.unwrap();
    tx.send(Message::Text("after".into())).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(Some(Ok(Message::Text(text)))) = timeout(Duration::from_millis(500), rx.next()).await {
        seen.push(text.as_str().to_string());
        if text.as_str() == "User1: after" {
            break;
        }
    }
    assert!(seen.contains(&"User1: after".to_string()));
    assert!(seen.iter().all(|l| !l.contains("maybe")));
    server.shutdown().await;
}

#[tokio::test]
async fn test_server_shutdown_sends_going_away() {
    let (server, url) = start_test_server(ServerConfig::for_testing()).await;
    let (client, mut events) = connect_client(&url).await;
    wait_for(&mut events, |m| *m == ServerMessage::Online(1)).await;

    server.shutdown().await;

    let reason = loop {
        match timeout(Duration::from_secs(2), events.recv()).await {
            Ok(Some(ChatEvent::Disconnected(reason))) => break reason,
            Ok(Some(_)) => continue,
            other => panic!("Expected Disconnected event, got {other:?}"),
        }
    };
    assert_eq!(reason, DisconnectReason::ServerGoingAway);
    assert!(reason.should_reconnect());
    assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_offline_lines_replayed_on_connect() {
    let (server, url) = start_test_server(ServerConfig::for_testing()).await;
    let client = ChatClient::new(url.as_str());
    let mut events = client.take_event_rx().unwrap();

    client.send_chat("typed while away").await.unwrap();
    assert_eq!(client.offline_queue_len().await, 1);

    client.connect().await.unwrap();
    let line = wait_for(&mut events, |m| matches!(m, ServerMessage::Chat(t) if t.starts_with("User1:"))).await;
    assert_eq!(line, ServerMessage::Chat("User1: typed while away".into()));
    assert_eq!(client.offline_queue_len().await, 0);
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_send_during_connect_keeps_order() {
    let (server, url) = start_test_server(ServerConfig::for_testing()).await;

    for _ in 0..20 {
        let client = std::sync::Arc::new(ChatClient::new(url.as_str()));
        let mut events = client.take_event_rx().unwrap();
        client.send_chat("queued").await.unwrap();

        let sender = client.clone();
        let live = tokio::spawn(async move {
            for n in 1..=5 {
                sender.send_chat(format!("live{n}")).await.unwrap();
                tokio::task::yield_now().await;
            }
        });
        client.connect().await.unwrap();
        live.await.unwrap();

        let (name, _) = match wait_for(&mut events, |m| matches!(m, ServerMessage::Username { .. })).await {
            ServerMessage::Username { name, color } => (name, color),
            other => panic!("unexpected {other:?}"),
        };
        let prefix = format!("{name}: ");
        let mut lines = Vec::new();
        while lines.len() < 6 {
            if let ServerMessage::Chat(line) =
                wait_for(&mut events, |m| matches!(m, ServerMessage::Chat(t) if t.starts_with(&prefix))).await
            {
                lines.push(line.trim_start_matches(&prefix).to_string());
            }
        }
        assert_eq!(lines, vec!["queued", "live1", "live2", "live3", "live4", "live5"]);
        assert_eq!(client.offline_queue_len().await, 0);
        client.disconnect().await;
    }
    server.shutdown().await;
}
