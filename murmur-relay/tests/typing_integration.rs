//! Integration tests for the typing indicator across real connections.

use murmur_relay::client::{ChatClient, ChatEvent};
use murmur_relay::protocol::ServerMessage;
use murmur_relay::server::{ChatServer, ServerConfig, ServerHandle};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

async fn start_test_server() -> (ServerHandle, String) {
    let handle = ChatServer::new(ServerConfig::for_testing()).spawn().await.unwrap();
    let url = format!("ws://{}/", handle.local_addr());
    (handle, url)
}

async fn connect_client(url: &str) -> (ChatClient, mpsc::Receiver<ChatEvent>) {
    let client = ChatClient::new(url);
    let events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();
    (client, events)
}

/// Next `writing:` broadcast, skipping everything else.
async fn next_writing(events: &mut mpsc::Receiver<ChatEvent>) -> Vec<String> {
    loop {
        match timeout(Duration::from_secs(2), events.recv()).await {
            Ok(Some(ChatEvent::Message(ServerMessage::Writing(names)))) => return names,
            Ok(Some(_)) => continue,
            other => panic!("Expected writing broadcast, got {other:?}"),
        }
    }
}

/// Connect two clients and wait until both have seen each other arrive.
async fn two_clients(
    url: &str,
) -> ((ChatClient, mpsc::Receiver<ChatEvent>), (ChatClient, mpsc::Receiver<ChatEvent>)) {
    let (c1, mut e1) = connect_client(url).await;
    let (c2, mut e2) = connect_client(url).await;
    for events in [&mut e1, &mut e2] {
        loop {
            match timeout(Duration::from_secs(2), events.recv()).await {
                Ok(Some(ChatEvent::Message(ServerMessage::Online(2)))) => break,
                Ok(Some(_)) => continue,
                other => panic!("Expected online:2, got {other:?}"),
            }
        }
    }
    ((c1, e1), (c2, e2))
}

#[tokio::test]
async fn test_typing_list_grows_in_order() {
    let (server, url) = start_test_server().await;
    let ((c1, mut e1), (c2, mut e2)) = two_clients(&url).await;

    c1.send_typing(true).await.unwrap();
    assert_eq!(next_writing(&mut e1).await, vec!["User1"]);
    assert_eq!(next_writing(&mut e2).await, vec!["User1"]);

    c2.send_typing(true).await.unwrap();
    assert_eq!(next_writing(&mut e1).await, vec!["User1", "User2"]);
    assert_eq!(next_writing(&mut e2).await, vec!["User1", "User2"]);
    server.shutdown().await;
}

#[tokio::test]
async fn test_typer_disconnect_clears_indicator() {
    let (server, url) = start_test_server().await;
    let ((c1, _e1), (c2, mut e2)) = two_clients(&url).await;

    c1.send_typing(true).await.unwrap();
    assert_eq!(next_writing(&mut e2).await, vec!["User1"]);
    c2.send_typing(true).await.unwrap();
    assert_eq!(next_writing(&mut e2).await, vec!["User1", "User2"]);

    c1.disconnect().await;
    assert_eq!(next_writing(&mut e2).await, vec!["User2"]);

    // Remaining traffic after the writing update.
    let mut rest = Vec::new();
    while rest.len() < 2 {
        match timeout(Duration::from_secs(2), e2.recv()).await {
            Ok(Some(ChatEvent::Message(msg))) => rest.push(msg),
            Ok(Some(_)) => continue,
            other => panic!("Expected disconnect notices, got {other:?}"),
        }
    }
    assert_eq!(
        rest,
        vec![ServerMessage::Chat("User1 disconnected".into()), ServerMessage::Online(1)]
    );
    assert!(!server.router().typing().snapshot().await.is_empty());
    server.shutdown().await;
}

#[tokio::test]
async fn test_stop_typing_empties_list() {
    let (server, url) = start_test_server().await;
    let ((c1, mut e1), (_c2, mut e2)) = two_clients(&url).await;

    c1.send_typing(true).await.unwrap();
    assert_eq!(next_writing(&mut e1).await, vec!["User1"]);

    c1.send_typing(false).await.unwrap();
    assert!(next_writing(&mut e1).await.is_empty());
    assert_eq!(next_writing(&mut e2).await, vec!["User1"]);
    assert!(next_writing(&mut e2).await.is_empty());
    server.shutdown().await;
}

#[tokio::test]
async fn test_implicit_stop_on_disconnect() {
    let (server, url) = start_test_server().await;
    let ((c1, _e1), (_c2, mut e2)) = two_clients(&url).await;

    c1.send_typing(true).await.unwrap();
    assert_eq!(next_writing(&mut e2).await, vec!["User1"]);

    // Never sends writing:no.
    c1.disconnect().await;
    assert!(next_writing(&mut e2).await.is_empty());
    assert!(server.router().typing().snapshot().await.is_empty());
    server.shutdown().await;
}
