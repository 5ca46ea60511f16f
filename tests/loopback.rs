//! Client-level tests against the in-memory loopback transport.

use souq_link::{
    ChatMessage, ConnectionOptions, ConnectionStatus, MessageKind, SouqLinkClient,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn loopback_client() -> SouqLinkClient {
    SouqLinkClient::builder()
        .loopback()
        .options(ConnectionOptions::new().with_loopback_latency_ms(5))
        .build()
        .expect("loopback client builds")
}

async fn recv_message(rx: &mut mpsc::UnboundedReceiver<ChatMessage>) -> ChatMessage {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("message channel closed")
}

#[tokio::test]
async fn test_loopback_echoes_to_room_handler() {
    let client = loopback_client();
    client.connect().await.unwrap();
    assert!(client.is_connected());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = client
        .subscribe("room-1", move |message| {
            let _ = tx.send(message);
        })
        .await
        .unwrap();

    client
        .send_message(ChatMessage::talk("room-1", "buyer-7", "hi"))
        .await
        .unwrap();

    let got = recv_message(&mut rx).await;
    assert_eq!(got.content, "hi");
    assert_eq!(got.room_id, "room-1");
    assert_eq!(got.kind, MessageKind::Talk);
    assert!(got.message_id.is_some());
    assert!(got.client_message_id.is_some());
    assert!(got.timestamp > 0, "timestamp stamped at send time");

    assert!(
        timeout(Duration::from_millis(100), rx.recv()).await.is_err(),
        "delivered exactly once"
    );
}

#[tokio::test]
async fn test_send_while_disconnected_flushes_on_connect() {
    let client = loopback_client();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = client
        .subscribe("room-1", move |message| {
            let _ = tx.send(message);
        })
        .await
        .unwrap();

    client
        .send_message(ChatMessage::talk("room-1", "buyer-7", "queued"))
        .await
        .expect("send while disconnected returns without error");

    // Nothing is delivered while disconnected.
    assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());

    client.connect().await.unwrap();
    let got = recv_message(&mut rx).await;
    assert_eq!(got.content, "queued");

    assert!(
        timeout(Duration::from_millis(100), rx.recv()).await.is_err(),
        "queued message published exactly once"
    );
}

#[tokio::test]
async fn test_handlers_are_room_scoped() {
    let client = loopback_client();
    client.connect().await.unwrap();

    let (tx1, mut rx1) = mpsc::unbounded_channel();
    let (tx2, mut rx2) = mpsc::unbounded_channel();
    let _sub1 = client
        .subscribe("room-1", move |message| {
            let _ = tx1.send(message);
        })
        .await
        .unwrap();
    let _sub2 = client
        .subscribe("room-2", move |message| {
            let _ = tx2.send(message);
        })
        .await
        .unwrap();

    client
        .send_message(ChatMessage::talk("room-2", "seller-3", "only two"))
        .await
        .unwrap();

    assert_eq!(recv_message(&mut rx2).await.content, "only two");
    assert!(timeout(Duration::from_millis(100), rx1.recv()).await.is_err());
}

#[tokio::test]
async fn test_unsubscribed_handler_never_sees_stragglers() {
    let client = SouqLinkClient::builder()
        .loopback()
        .options(ConnectionOptions::new().with_loopback_latency_ms(50))
        .build()
        .unwrap();
    client.connect().await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = seen.clone();
    let mut sub = client
        .subscribe("room-1", move |message| {
            sink.lock().unwrap().push(message.content);
        })
        .await
        .unwrap();

    client
        .send_message(ChatMessage::talk("room-1", "buyer-7", "late"))
        .await
        .unwrap();

    // The echo is still in flight (50 ms simulated latency); removing the
    // last handler first must win.
    sub.unsubscribe();
    assert!(!sub.is_active());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_forcible_unsubscribe_silences_all_handlers() {
    let client = loopback_client();
    client.connect().await.unwrap();

    let (tx1, mut rx1) = mpsc::unbounded_channel();
    let (tx2, mut rx2) = mpsc::unbounded_channel();
    let _sub1 = client
        .subscribe("room-1", move |message| {
            let _ = tx1.send(message);
        })
        .await
        .unwrap();
    let _sub2 = client
        .subscribe("room-1", move |message| {
            let _ = tx2.send(message);
        })
        .await
        .unwrap();

    client.unsubscribe("room-1");

    client
        .send_message(ChatMessage::talk("room-1", "buyer-7", "void"))
        .await
        .unwrap();

    // Removing the handlers drops their channel senders, so the receivers
    // either time out or observe the closed channel — never a message.
    assert_no_delivery(&mut rx1).await;
    assert_no_delivery(&mut rx2).await;
}

async fn assert_no_delivery(rx: &mut mpsc::UnboundedReceiver<ChatMessage>) {
    match timeout(Duration::from_millis(100), rx.recv()).await {
        Err(_) => {}
        Ok(None) => {}
        Ok(Some(message)) => panic!("unexpected delivery: {}", message.content),
    }
}

#[tokio::test]
async fn test_status_listener_replays_and_tracks_transitions() {
    let client = loopback_client();
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = statuses.clone();
    let _guard = client.on_status_change(move |status| {
        sink.lock().unwrap().push(status);
    });

    assert_eq!(
        *statuses.lock().unwrap(),
        vec![ConnectionStatus::Disconnected],
        "immediate replay of the current status"
    );

    client.connect().await.unwrap();
    client.disconnect().await.unwrap();

    assert_eq!(
        *statuses.lock().unwrap(),
        vec![
            ConnectionStatus::Disconnected,
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
            ConnectionStatus::Disconnected,
        ]
    );
}

#[tokio::test]
async fn test_disconnect_drops_queued_messages() {
    let client = loopback_client();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = client
        .subscribe("room-1", move |message| {
            let _ = tx.send(message);
        })
        .await
        .unwrap();

    client
        .send_message(ChatMessage::talk("room-1", "buyer-7", "stale"))
        .await
        .unwrap();
    client.disconnect().await.unwrap();

    // The explicit disconnect cleared both queues; a later connect does not
    // replay the stale send, and the room must be re-subscribed.
    client.connect().await.unwrap();
    assert_no_delivery(&mut rx).await;
}
