//! Integration tests for end-to-end WebSocket synchronization.
//!
//! These tests start a real server and connect real clients,
//! verifying the full pipeline from socket to room log and back.

use futures_util::{SinkExt, StreamExt};
use scrawl_collab::client::{ConnectionState, SyncClient, SyncEvent};
use scrawl_collab::operation::{Operation, Point};
use scrawl_collab::protocol::ServerEvent;
use scrawl_collab::replica::CanvasReplica;
use scrawl_collab::room::ActionError;
use scrawl_collab::server::{ServerConfig, SyncServer};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a server on a free port, return the server and its URL.
async fn start_test_server() -> (Arc<SyncServer>, String) {
    let port = free_port().await;
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        broadcast_capacity: 64,
        ..ServerConfig::default()
    };
    let server = Arc::new(SyncServer::new(config));
    let running = server.clone();
    tokio::spawn(async move {
        running.run().await.unwrap();
    });
    // Give server time to bind
    tokio::time::sleep(Duration::from_millis(50)).await;
    (server, format!("ws://127.0.0.1:{port}"))
}

/// Connect a client, join `room`, and wait for its `init`.
async fn join(url: &str, room: &str, name: &str) -> (SyncClient, mpsc::Receiver<SyncEvent>, ServerEvent) {
    let mut client = SyncClient::new(url);
    let mut events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();
    assert_eq!(next_event(&mut events).await, SyncEvent::Connected);

    client.join(Some(room), Some(name)).await.unwrap();
    let init = next_server_event(&mut events).await;
    assert!(matches!(init, ServerEvent::Init { .. }), "expected init, got {init:?}");
    (client, events, init)
}

async fn next_event(events: &mut mpsc::Receiver<SyncEvent>) -> SyncEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("event within timeout")
        .expect("event channel open")
}

async fn next_server_event(events: &mut mpsc::Receiver<SyncEvent>) -> ServerEvent {
    match next_event(events).await {
        SyncEvent::Server(event) => event,
        other => panic!("expected server event, got {other:?}"),
    }
}

/// Skip events until one matches `pred`.
async fn wait_for(
    events: &mut mpsc::Receiver<SyncEvent>,
    pred: impl Fn(&ServerEvent) -> bool,
) -> ServerEvent {
    loop {
        let event = next_server_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Drain everything that arrives within a short window.
async fn drain(events: &mut mpsc::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut drained = Vec::new();
    while let Ok(Some(event)) = timeout(Duration::from_millis(100), events.recv()).await {
        drained.push(event);
    }
    drained
}

fn stroke(id: &str, points: usize) -> Operation {
    let points = (0..points).map(|i| Point::new(i as f64, i as f64)).collect();
    Operation::brush(id, points, "#E11D48", 4.0)
}

#[tokio::test]
async fn test_server_accepts_connections() {
    let (_server, url) = start_test_server().await;
    let result = tokio_tungstenite::connect_async(&url).await;
    assert!(result.is_ok(), "Should connect to server");
}

#[tokio::test]
async fn test_client_connects_and_receives_init() {
    let (_server, url) = start_test_server().await;
    let (client, mut events, init) = join(&url, "main", "Alice").await;

    match init {
        ServerEvent::Init { operations, sessions, you } => {
            assert!(operations.is_empty());
            assert_eq!(sessions.len(), 1);
            assert_eq!(sessions[&you.id].name, "Alice");
        }
        other => panic!("expected init, got {other:?}"),
    }
    assert!(matches!(next_server_event(&mut events).await, ServerEvent::UsersUpdate { .. }));
    assert_eq!(client.connection_state().await, ConnectionState::Connected);
}

#[tokio::test]
async fn test_stroke_reaches_peers_but_not_author() {
    let (_server, url) = start_test_server().await;
    let (alice, mut alice_events, _) = join(&url, "main", "Alice").await;
    let (_bob, mut bob_events, _) = join(&url, "main", "Bob").await;
    drain(&mut alice_events).await;
    drain(&mut bob_events).await;

    alice.send_stroke(&stroke("a1", 1)).await.unwrap();
    alice.send_stroke(&stroke("a1", 3)).await.unwrap();

    for expected_points in [1, 3] {
        match next_server_event(&mut bob_events).await {
            ServerEvent::StrokeRemote(op) => {
                assert_eq!(op.id, "a1");
                assert_eq!(op.points.len(), expected_points);
            }
            other => panic!("expected stroke:remote, got {other:?}"),
        }
    }
    assert!(drain(&mut alice_events).await.is_empty(), "author must not see its own diff");
}

#[tokio::test]
async fn test_undo_rebuilds_everyone() {
    let (_server, url) = start_test_server().await;
    let (alice, mut alice_events, _) = join(&url, "main", "Alice").await;
    let (bob, mut bob_events, _) = join(&url, "main", "Bob").await;

    alice.send_stroke(&stroke("a1", 2)).await.unwrap();
    wait_for(&mut bob_events, |e| matches!(e, ServerEvent::StrokeRemote(_))).await;

    // Bob undoes without an id: the latest active operation is Alice's.
    bob.undo(None).await.unwrap();
    for events in [&mut alice_events, &mut bob_events] {
        match wait_for(events, |e| matches!(e, ServerEvent::HistoryRebuild { .. })).await {
            ServerEvent::HistoryRebuild { operations } => {
                assert_eq!(operations.len(), 1);
                assert!(operations[0].undone);
            }
            _ => unreachable!(),
        }
    }
}

#[tokio::test]
async fn test_failed_undo_only_reaches_requester() {
    let (_server, url) = start_test_server().await;
    let (alice, mut alice_events, _) = join(&url, "main", "Alice").await;
    let (_bob, mut bob_events, _) = join(&url, "main", "Bob").await;
    drain(&mut alice_events).await;
    drain(&mut bob_events).await;

    alice.undo(None).await.unwrap();
    assert_eq!(
        next_server_event(&mut alice_events).await,
        ServerEvent::action_error(ActionError::NothingToUndo)
    );
    assert!(drain(&mut bob_events).await.is_empty());
}

#[tokio::test]
async fn test_rooms_are_isolated() {
    let (_server, url) = start_test_server().await;
    let (red, mut red_events, _) = join(&url, "red", "Red").await;
    let (_blue, mut blue_events, _) = join(&url, "blue", "Blue").await;
    drain(&mut red_events).await;
    drain(&mut blue_events).await;

    red.send_stroke(&stroke("r1", 2)).await.unwrap();
    red.clear().await.unwrap();
    wait_for(&mut red_events, |e| matches!(e, ServerEvent::HistoryRebuild { .. })).await;

    assert!(drain(&mut blue_events).await.is_empty());
}

#[tokio::test]
async fn test_late_joiner_sees_history() {
    let (_server, url) = start_test_server().await;
    let (alice, mut alice_events, _) = join(&url, "main", "Alice").await;
    alice.send_stroke(&stroke("a1", 2)).await.unwrap();
    alice.send_stroke(&stroke("a2", 2)).await.unwrap();
    alice.undo(Some("a2")).await.unwrap();
    wait_for(&mut alice_events, |e| matches!(e, ServerEvent::HistoryRebuild { .. })).await;

    let (_bob, _bob_events, init) = join(&url, "main", "Bob").await;
    match init {
        ServerEvent::Init { operations, sessions, .. } => {
            let ids: Vec<_> = operations.iter().map(|op| op.id.as_str()).collect();
            assert_eq!(ids, vec!["a1", "a2"]);
            assert!(!operations[0].undone);
            assert!(operations[1].undone);
            assert_eq!(sessions.len(), 2);
        }
        other => panic!("expected init, got {other:?}"),
    }
}

#[tokio::test]
async fn test_disconnect_updates_membership() {
    let (_server, url) = start_test_server().await;
    let (_alice, mut alice_events, _) = join(&url, "main", "Alice").await;
    let (mut bob, _bob_events, _) = join(&url, "main", "Bob").await;
    wait_for(&mut alice_events, |e| {
        matches!(e, ServerEvent::UsersUpdate { sessions } if sessions.len() == 2)
    })
    .await;

    bob.disconnect().await;
    wait_for(&mut alice_events, |e| {
        matches!(e, ServerEvent::UsersUpdate { sessions } if sessions.len() == 1)
    })
    .await;
}

#[tokio::test]
async fn test_cursor_relay() {
    let (_server, url) = start_test_server().await;
    let (alice, mut alice_events, init) = join(&url, "main", "Alice").await;
    let (_bob, mut bob_events, _) = join(&url, "main", "Bob").await;
    drain(&mut alice_events).await;
    drain(&mut bob_events).await;

    let alice_id = match init {
        ServerEvent::Init { you, .. } => you.id,
        _ => unreachable!(),
    };

    alice.send_cursor(12.5, 40.0).await.unwrap();
    assert_eq!(
        next_server_event(&mut bob_events).await,
        ServerEvent::Cursor { session_id: alice_id, x: 12.5, y: 40.0 }
    );
    assert!(drain(&mut alice_events).await.is_empty());
}

#[tokio::test]
async fn test_replicas_converge() {
    let (_server, url) = start_test_server().await;
    let (alice, mut alice_events, alice_init) = join(&url, "main", "Alice").await;
    let (bob, mut bob_events, bob_init) = join(&url, "main", "Bob").await;

    let mut alice_replica = CanvasReplica::new();
    let mut bob_replica = CanvasReplica::new();
    alice_replica.apply(&alice_init);
    bob_replica.apply(&bob_init);

    let a1 = stroke("a1", 3);
    alice_replica.record_local(a1.clone());
    alice.send_stroke(&a1).await.unwrap();
    let b1 = stroke("b1", 2);
    bob_replica.record_local(b1.clone());
    bob.send_stroke(&b1).await.unwrap();

    // Both strokes are in the log before anyone undoes.
    for (events, replica, other) in [
        (&mut alice_events, &mut alice_replica, "b1"),
        (&mut bob_events, &mut bob_replica, "a1"),
    ] {
        loop {
            let event = next_server_event(events).await;
            replica.apply(&event);
            if matches!(&event, ServerEvent::StrokeRemote(op) if op.id == other) {
                break;
            }
        }
    }

    // Alice undoes her own stroke by id, as the browser client does.
    let target = alice_replica.undo_target().map(str::to_string);
    assert_eq!(target.as_deref(), Some("a1"));
    alice.undo(target.as_deref()).await.unwrap();

    for (events, replica) in [(&mut alice_events, &mut alice_replica), (&mut bob_events, &mut bob_replica)] {
        loop {
            let event = next_server_event(events).await;
            replica.apply(&event);
            if matches!(event, ServerEvent::HistoryRebuild { .. }) {
                break;
            }
        }
    }

    assert_eq!(alice_replica.operations(), bob_replica.operations());
    let visible: Vec<_> = bob_replica.visible().map(|op| op.id.as_str()).collect();
    assert_eq!(visible, vec!["b1"]);
}

#[tokio::test]
async fn test_malformed_frames_are_ignored() {
    let (server, url) = start_test_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    ws.send(Message::text("not json")).await.unwrap();
    ws.send(Message::text(r#"{"event":"teleport","data":{}}"#)).await.unwrap();
    ws.send(Message::Ping(vec![1, 2, 3].into())).await.unwrap();

    // Still alive: pong, then a join is answered.
    match timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap() {
        Message::Pong(data) => assert_eq!(&data[..], &[1, 2, 3]),
        other => panic!("expected pong, got {other:?}"),
    }
    ws.send(Message::text(r#"{"event":"join","data":{}}"#)).await.unwrap();
    match timeout(Duration::from_secs(2), ws.next()).await.unwrap().unwrap().unwrap() {
        Message::Text(text) => {
            let event = ServerEvent::decode(text.as_str()).unwrap();
            assert!(matches!(event, ServerEvent::Init { .. }));
        }
        other => panic!("expected init, got {other:?}"),
    }

    let stats = server.stats().await;
    assert_eq!(stats.total_connections, 1);
    assert_eq!(stats.total_messages, 3);
    assert_eq!(stats.active_rooms, 1);
}
