use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use termdeck_protocol::{InboundMessage, OutboundMessage};
use termdeck_transport::{spawn, TransportConfig, TransportEvent};
use termdeck_types::ConnectionState;

const WAIT: Duration = Duration::from_secs(5);

async fn next_event(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("transport stopped")
}

#[tokio::test]
async fn test_queued_messages_flush_on_connect_and_frames_decode() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    // queued before the transport even starts
    outbound_tx.send(OutboundMessage::GetCurrentDirectory).unwrap();

    let mut config = TransportConfig::new(format!("ws://{}", addr));
    config.initial_backoff = Duration::from_millis(20);
    let mut handle = spawn(config, outbound_rx);

    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut server = accept_async(stream).await.unwrap();

    let mut saw_connected = false;
    for _ in 0..2 {
        if let TransportEvent::ConnectionChanged(ConnectionState::Connected) = next_event(&mut handle.events).await {
            saw_connected = true;
            break;
        }
    }
    assert!(saw_connected);

    match timeout(WAIT, server.next()).await.unwrap() {
        Some(Ok(Message::Text(text))) => assert_eq!(text, r#"{"type":"get_current_directory"}"#),
        other => panic!("unexpected frame: {:?}", other),
    }

    server.send(Message::Text(r#"{"type":"mystery"}"#.to_string())).await.unwrap();
    server
        .send(Message::Text(r#"{"type":"directory_changed","directory":"/srv"}"#.to_string()))
        .await
        .unwrap();

    assert!(matches!(next_event(&mut handle.events).await, TransportEvent::ProtocolError(_)));
    match next_event(&mut handle.events).await {
        TransportEvent::Message(InboundMessage::DirectoryChanged { directory }) => assert_eq!(directory, "/srv"),
        other => panic!("unexpected event: {:?}", other),
    }

    handle.shutdown();
}

#[tokio::test]
async fn test_reconnects_after_server_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let mut config = TransportConfig::new(format!("ws://{}", addr));
    config.initial_backoff = Duration::from_millis(20);
    let mut handle = spawn(config, outbound_rx);

    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let server = accept_async(stream).await.unwrap();
    drop(server);

    let mut saw_reconnecting = false;
    loop {
        match next_event(&mut handle.events).await {
            TransportEvent::ConnectionChanged(ConnectionState::Reconnecting { .. }) => {
                saw_reconnecting = true;
                break;
            }
            TransportEvent::ConnectionChanged(_) => continue,
            other => panic!("unexpected event: {:?}", other),
        }
    }
    assert!(saw_reconnecting);

    // sent while down, delivered after the next accept
    outbound_tx.send(OutboundMessage::GetProcessList).unwrap();
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut server = accept_async(stream).await.unwrap();
    match timeout(WAIT, server.next()).await.unwrap() {
        Some(Ok(Message::Text(text))) => assert_eq!(text, r#"{"type":"get_process_list"}"#),
        other => panic!("unexpected frame: {:?}", other),
    }

    handle.shutdown();
}
