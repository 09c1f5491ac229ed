//! Integration tests against a real WebSocket relay.
//!
//! Each test binds a relay on a free port and connects clients through
//! `WebSocketTransport`, covering the full frame codec and subscribe
//! handshake.

use quill_collab::client::{ClientConfig, CollabClient, CollabEvent};
use quill_collab::presence::LocalUser;
use quill_collab::reconnect::ConnectionState;
use quill_collab::server::{RelayConfig, RelayServer};
use quill_collab::transport::WebSocketTransport;
use quill_collab::CollabError;
use quill_core::Operation;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};

const DOC: &str = "shared-notes";
const WAIT: Duration = Duration::from_secs(5);

type Client = CollabClient<WebSocketTransport>;

/// Start a relay on a free port, return it with its ws:// URL.
async fn start_relay(access_token: Option<&str>) -> (RelayServer, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let relay = RelayServer::new(RelayConfig {
        bind_addr: addr.to_string(),
        max_peers_per_room: 10,
        broadcast_capacity: 64,
        access_token: access_token.map(str::to_string),
    });
    let server = relay.clone();
    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });
    (relay, format!("ws://{addr}"))
}

async fn connect_client(
    transport: WebSocketTransport,
    name: &str,
    content: &str,
) -> (Client, mpsc::Receiver<CollabEvent>) {
    let mut client = CollabClient::new(
        transport,
        DOC,
        LocalUser::new(name),
        content,
        ClientConfig::default(),
    );
    let events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();
    (client, events)
}

async fn wait_content(client: &Client, expected: &str) {
    let reached = timeout(WAIT, async {
        while client.content().await != expected {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "{} never reached {expected:?}", client.user().name);
}

async fn wait_peers(client: &Client, count: usize) {
    let reached = timeout(WAIT, async {
        while client.presence().await.len() != count {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "{} never saw {count} peers", client.user().name);
}

#[tokio::test]
async fn test_relay_connect_and_disconnect() {
    let (relay, url) = start_relay(None).await;
    let (mut alice, mut events) = connect_client(WebSocketTransport::new(&url), "Alice", "").await;

    assert_eq!(events.recv().await, Some(CollabEvent::ConnectionChanged(true)));
    assert_eq!(alice.connection_state().await, ConnectionState::Connected);

    assert_eq!(relay.stats().await.total_connections, 1);
    assert_eq!(relay.room_manager().room_count().await, 1);

    alice.disconnect().await;
    assert_eq!(alice.connection_state().await, ConnectionState::Disconnected);

    let closed = timeout(WAIT, async {
        while relay.stats().await.active_connections != 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(closed.is_ok(), "relay kept the connection open");
    assert_eq!(relay.room_manager().room_count().await, 0);
}

#[tokio::test]
async fn test_relay_clients_converge() {
    let (_relay, url) = start_relay(None).await;
    let (alice, _ea) = connect_client(WebSocketTransport::new(&url), "Alice", "Hello").await;
    let (bob, _eb) = connect_client(WebSocketTransport::new(&url), "Bob", "Hello").await;
    wait_peers(&alice, 1).await;
    wait_peers(&bob, 1).await;

    let (a, b) = tokio::join!(
        alice.send_operation(Operation::new().retain(5).insert(" World")),
        bob.send_operation(Operation::new().insert(">> ").retain(5)),
    );
    a.unwrap();
    b.unwrap();

    wait_content(&alice, ">> Hello World").await;
    wait_content(&bob, ">> Hello World").await;
}

#[tokio::test]
async fn test_relay_presence_and_cursors() {
    let (_relay, url) = start_relay(None).await;
    let (alice, _ea) = connect_client(WebSocketTransport::new(&url), "Alice", "abc").await;
    let (mut bob, _eb) = connect_client(WebSocketTransport::new(&url), "Bob", "abc").await;

    wait_peers(&alice, 1).await;
    assert_eq!(alice.presence().await[0].user_name, "Bob");

    bob.update_cursor(2, None);
    let seen = timeout(WAIT, async {
        loop {
            if let Some(cursor) = alice.cursors().await.first() {
                return cursor.clone();
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("cursor never arrived");
    assert_eq!(seen.user_id, bob.user().id);
    assert_eq!(seen.position, 2);

    bob.disconnect().await;
    wait_peers(&alice, 0).await;
    assert!(alice.cursors().await.is_empty());
}

#[tokio::test]
async fn test_relay_rejects_bad_token() {
    let (relay, url) = start_relay(Some("s3cret")).await;

    let mut intruder = CollabClient::new(
        WebSocketTransport::new(&url).with_token("guess"),
        DOC,
        LocalUser::new("Mallory"),
        "",
        ClientConfig::default(),
    );
    let err = intruder.connect().await.unwrap_err();
    assert_eq!(err, CollabError::Config("invalid access token".into()));
    assert_eq!(intruder.connection_state().await, ConnectionState::Disconnected);
    assert_eq!(relay.stats().await.rejected_subscriptions, 1);

    let (alice, _ea) = connect_client(
        WebSocketTransport::new(&url).with_token("s3cret"),
        "Alice",
        "",
    )
    .await;
    assert_eq!(alice.connection_state().await, ConnectionState::Connected);
}

#[tokio::test]
async fn test_relay_kick_triggers_reconnect() {
    let (relay, url) = start_relay(None).await;
    let (alice, mut events) = connect_client(WebSocketTransport::new(&url), "Alice", "").await;
    assert_eq!(events.recv().await, Some(CollabEvent::ConnectionChanged(true)));

    assert_eq!(relay.kick(DOC).await, 1);

    let mut transitions = Vec::new();
    let _ = timeout(Duration::from_secs(10), async {
        while let Some(event) = events.recv().await {
            if let CollabEvent::ConnectionChanged(up) = event {
                transitions.push(up);
                if up {
                    return;
                }
            }
        }
    })
    .await;
    assert_eq!(transitions, vec![false, true]);
    assert_eq!(alice.connection_state().await, ConnectionState::Connected);
    assert_eq!(relay.stats().await.total_connections, 2);
}
