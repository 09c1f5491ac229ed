//! End-to-end tests for the collaboration client over the in-process hub.
//!
//! Every test connects real clients (driver task, throttle, backoff) to a
//! shared `MemoryHub`, so broadcast, presence and reconnect behave as they
//! would against a relay.

use quill_collab::client::{ClientConfig, CollabClient, CollabEvent};
use quill_collab::presence::{LocalUser, Selection};
use quill_collab::protocol::{AckMessage, BroadcastEvent};
use quill_collab::reconnect::ConnectionState;
use quill_collab::transport::{ChannelEvent, MemoryHub, Transport, WebSocketTransport};
use quill_collab::CollabError;
use quill_core::Operation;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};
use uuid::Uuid;

const DOC: &str = "doc-1";
const WAIT: Duration = Duration::from_secs(5);

type Client = CollabClient<MemoryHub>;

async fn join(hub: &MemoryHub, name: &str, content: &str) -> (Client, mpsc::Receiver<CollabEvent>) {
    let mut client = CollabClient::new(
        hub.clone(),
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
    assert!(
        reached.is_ok(),
        "{} never reached {expected:?}, has {:?}",
        client.user().name,
        client.content().await
    );
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

async fn wait_event(
    events: &mut mpsc::Receiver<CollabEvent>,
    limit: Duration,
    mut matches: impl FnMut(&CollabEvent) -> bool,
) -> CollabEvent {
    timeout(limit, async {
        loop {
            match events.recv().await {
                Some(event) if matches(&event) => return event,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("expected event never arrived")
}

/// Append `text` at the end, retrying when a remote edit lands first.
async fn append(client: &Client, text: &str) {
    loop {
        let len = client.content().await.chars().count();
        let op = Operation::new().retain(len).insert(text);
        if client.send_operation(op).await.is_ok() {
            return;
        }
        tokio::task::yield_now().await;
    }
}

async fn type_burst(client: &Client, tag: char) {
    for i in 0..4u64 {
        append(client, &format!("{tag}{i}")).await;
        sleep(Duration::from_millis(1 + i)).await;
    }
}

// ─── Editing ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_two_clients_exchange_edits() {
    let hub = MemoryHub::new();
    let (alice, _ea) = join(&hub, "Alice", "").await;
    let (bob, _eb) = join(&hub, "Bob", "").await;
    wait_peers(&alice, 1).await;
    wait_peers(&bob, 1).await;

    alice.send_operation(Operation::new().insert("Hello")).await.unwrap();
    wait_content(&bob, "Hello").await;

    bob.send_operation(Operation::new().retain(5).insert(" World"))
        .await
        .unwrap();
    wait_content(&alice, "Hello World").await;
    assert_eq!(alice.revision().await, 2);
    assert_eq!(bob.revision().await, 2);
}

#[tokio::test]
async fn test_concurrent_edits_converge() {
    let hub = MemoryHub::new();
    let (alice, _ea) = join(&hub, "Alice", "ab").await;
    let (bob, _eb) = join(&hub, "Bob", "ab").await;
    wait_peers(&alice, 1).await;
    wait_peers(&bob, 1).await;

    // Neither has seen the other's edit when sending.
    let (a, b) = tokio::join!(
        alice.send_operation(Operation::new().insert("X").retain(2)),
        bob.send_operation(Operation::new().retain(2).insert("Y")),
    );
    a.unwrap();
    b.unwrap();

    wait_content(&alice, "XabY").await;
    wait_content(&bob, "XabY").await;
}

#[tokio::test]
async fn test_insert_against_concurrent_delete() {
    let hub = MemoryHub::new();
    let (a, _ea) = join(&hub, "A", "hello").await;
    let (b, _eb) = join(&hub, "B", "hello").await;
    let (c, _ec) = join(&hub, "C", "hello").await;
    for client in [&a, &b, &c] {
        wait_peers(client, 2).await;
    }

    let (ins, del) = tokio::join!(
        a.send_operation(Operation::new().retain(5).insert(" world")),
        b.send_operation(Operation::new().delete(5)),
    );
    ins.unwrap();
    del.unwrap();

    for client in [&a, &b, &c] {
        wait_content(client, " world").await;
    }
}

#[tokio::test]
async fn test_three_clients_same_position_converge() {
    let hub = MemoryHub::new();
    let (alice, _ea) = join(&hub, "Alice", "").await;
    let (bob, _eb) = join(&hub, "Bob", "").await;
    let (carol, _ec) = join(&hub, "Carol", "").await;
    for client in [&alice, &bob, &carol] {
        wait_peers(client, 2).await;
    }

    let (a, b, c) = tokio::join!(
        alice.send_operation(Operation::new().insert("a")),
        bob.send_operation(Operation::new().insert("b")),
        carol.send_operation(Operation::new().insert("c")),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    let converged = timeout(WAIT, async {
        loop {
            let texts = [alice.content().await, bob.content().await, carol.content().await];
            if texts[0].chars().count() == 3 && texts.iter().all(|t| *t == texts[0]) {
                return texts[0].clone();
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("clients did not converge");

    let mut letters: Vec<char> = converged.chars().collect();
    letters.sort_unstable();
    assert_eq!(letters, vec!['a', 'b', 'c']);
}

#[tokio::test]
async fn test_three_writers_with_several_edits_converge() {
    let hub = MemoryHub::new();
    let (alice, _ea) = join(&hub, "Alice", "").await;
    let (bob, _eb) = join(&hub, "Bob", "").await;
    let (carol, _ec) = join(&hub, "Carol", "").await;
    for client in [&alice, &bob, &carol] {
        wait_peers(client, 2).await;
    }

    tokio::join!(
        type_burst(&alice, 'a'),
        type_burst(&bob, 'b'),
        type_burst(&carol, 'c'),
    );

    let converged = timeout(WAIT, async {
        loop {
            let texts = [alice.content().await, bob.content().await, carol.content().await];
            if texts[0].chars().count() == 24 && texts.iter().all(|t| *t == texts[0]) {
                return texts[0].clone();
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("clients did not converge");

    for tag in ['a', 'b', 'c'] {
        for i in 0..4 {
            assert!(converged.contains(&format!("{tag}{i}")), "{converged:?}");
        }
    }
}

#[tokio::test]
async fn test_remote_edit_emits_content_changed() {
    let hub = MemoryHub::new();
    let (alice, _ea) = join(&hub, "Alice", "").await;
    let (_bob, mut bob_events) = join(&hub, "Bob", "").await;
    wait_peers(&alice, 1).await;

    alice.send_operation(Operation::new().insert("hi")).await.unwrap();
    let event = wait_event(&mut bob_events, WAIT, |e| {
        matches!(e, CollabEvent::ContentChanged(_))
    })
    .await;
    assert_eq!(event, CollabEvent::ContentChanged("hi".into()));
}

#[tokio::test]
async fn test_acknowledged_history_is_pruned() {
    let hub = MemoryHub::new();
    let (alice, _ea) = join(&hub, "Alice", "").await;
    let (bob, _eb) = join(&hub, "Bob", "").await;
    wait_peers(&alice, 1).await;
    wait_peers(&bob, 1).await;

    alice.send_operation(Operation::new().insert("a")).await.unwrap();
    alice.send_operation(Operation::new().retain(1).insert("b")).await.unwrap();
    wait_content(&bob, "ab").await;

    let drained = timeout(WAIT, async {
        while !alice.pending_operations().await.is_empty() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "Bob's acknowledgement never pruned Alice's log");
}

// ─── Presence and cursors ────────────────────────────────────────

#[tokio::test]
async fn test_presence_join_and_leave() {
    let hub = MemoryHub::new();
    let (alice, mut alice_events) = join(&hub, "Alice", "hello").await;
    let (mut bob, _eb) = join(&hub, "Bob", "hello").await;

    let event = wait_event(&mut alice_events, WAIT, |e| {
        matches!(e, CollabEvent::PresenceChanged(peers) if !peers.is_empty())
    })
    .await;
    let CollabEvent::PresenceChanged(peers) = event else {
        unreachable!()
    };
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].user_id, bob.user().id);
    assert_eq!(peers[0].user_name, "Bob");

    bob.update_cursor(3, Some(Selection::new(1, 3)));
    let event = wait_event(&mut alice_events, WAIT, |e| {
        matches!(e, CollabEvent::CursorsChanged(c) if !c.is_empty())
    })
    .await;
    let CollabEvent::CursorsChanged(cursors) = event else {
        unreachable!()
    };
    assert_eq!(cursors[0].user_id, bob.user().id);
    assert_eq!(cursors[0].position, 3);
    assert_eq!(cursors[0].selection, Some(Selection::new(1, 3)));

    bob.disconnect().await;
    wait_peers(&alice, 0).await;
    assert!(alice.cursors().await.is_empty());
    assert_eq!(hub.member_count(DOC).await, 1);
}

#[tokio::test]
async fn test_cursor_updates_are_throttled() {
    let hub = MemoryHub::new();
    let observer = Uuid::new_v4();
    let mut raw = hub.open(DOC, observer).await.unwrap();
    let (bob, _eb) = join(&hub, "Bob", "0123456789").await;

    for position in 0..10 {
        bob.update_cursor(position, None);
    }

    let mut seen = Vec::new();
    let _ = timeout(Duration::from_millis(300), async {
        while let Some(event) = raw.recv().await {
            if let ChannelEvent::Broadcast(BroadcastEvent::Cursor(cursor)) = event {
                seen.push(cursor.position);
            }
        }
    })
    .await;

    // A burst inside one interval collapses to its last position.
    assert_eq!(seen, vec![9]);
}

#[tokio::test]
async fn test_local_edit_shifts_remote_cursor() {
    let hub = MemoryHub::new();
    let (alice, _ea) = join(&hub, "Alice", "abcdef").await;
    let (bob, _eb) = join(&hub, "Bob", "abcdef").await;
    wait_peers(&alice, 1).await;
    wait_peers(&bob, 1).await;

    bob.update_cursor(4, None);
    let seen = timeout(WAIT, async {
        while alice.cursors().await.is_empty() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(seen.is_ok());

    alice.send_operation(Operation::new().insert("XY").retain(6)).await.unwrap();
    assert_eq!(alice.cursors().await[0].position, 6);
}

// ─── Connection lifecycle ────────────────────────────────────────

#[tokio::test]
async fn test_connect_reports_config_error() {
    let mut client = CollabClient::new(
        WebSocketTransport::new("http://not-a-socket"),
        DOC,
        LocalUser::new("Alice"),
        "",
        ClientConfig::default(),
    );
    let mut events = client.take_event_rx().unwrap();

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, CollabError::Config(_)));
    assert!(err.is_terminal());
    assert_eq!(events.recv().await, Some(CollabEvent::Error(err)));
    assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_and_disconnect() {
    let hub = MemoryHub::new();
    let (mut alice, mut events) = join(&hub, "Alice", "").await;

    assert_eq!(events.recv().await, Some(CollabEvent::ConnectionChanged(true)));
    assert_eq!(alice.connection_state().await, ConnectionState::Connected);
    assert_eq!(hub.connection_count(DOC).await, 1);

    alice.disconnect().await;
    assert_eq!(alice.connection_state().await, ConnectionState::Disconnected);
    assert_eq!(hub.member_count(DOC).await, 0);
    wait_event(&mut events, WAIT, |e| *e == CollabEvent::ConnectionChanged(false)).await;
}

#[tokio::test]
async fn test_offline_edits_flush_on_connect() {
    let hub = MemoryHub::new();
    let (bob, _eb) = join(&hub, "Bob", "").await;

    let mut alice = CollabClient::new(
        hub.clone(),
        DOC,
        LocalUser::new("Alice"),
        "",
        ClientConfig::default(),
    );
    alice.send_operation(Operation::new().insert("off")).await.unwrap();
    alice
        .send_operation(Operation::new().retain(3).insert("line"))
        .await
        .unwrap();
    assert_eq!(alice.offline_queue_len().await, 2);

    alice.connect().await.unwrap();
    assert_eq!(alice.offline_queue_len().await, 0);
    wait_content(&bob, "offline").await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_channel_loss() {
    let hub = MemoryHub::new();
    let (alice, mut events) = join(&hub, "Alice", "").await;
    wait_event(&mut events, WAIT, |e| *e == CollabEvent::ConnectionChanged(true)).await;

    assert_eq!(hub.kick(DOC).await, 1);
    wait_event(&mut events, WAIT, |e| *e == CollabEvent::ConnectionChanged(false)).await;

    // Edits made while reconnecting are queued and replayed.
    let observer = Uuid::new_v4();
    let mut raw = hub.open(DOC, observer).await.unwrap();
    alice.send_operation(Operation::new().insert("late")).await.unwrap();

    wait_event(&mut events, Duration::from_secs(60), |e| {
        *e == CollabEvent::ConnectionChanged(true)
    })
    .await;
    assert_eq!(alice.connection_state().await, ConnectionState::Connected);
    assert_eq!(alice.offline_queue_len().await, 0);
    assert_eq!(hub.subscribe_attempts(), 3);

    let replayed = timeout(WAIT, async {
        loop {
            match raw.recv().await {
                Some(ChannelEvent::Broadcast(BroadcastEvent::Operation(msg))) => return msg,
                Some(_) => continue,
                None => panic!("observer channel closed"),
            }
        }
    })
    .await
    .expect("queued edit was not replayed");
    assert_eq!(replayed.user_id, alice.user().id);
    assert_eq!(replayed.operation, Operation::new().insert("late"));
}

#[tokio::test(start_paused = true)]
async fn test_lagging_client_reconnects() {
    let hub = MemoryHub::with_capacity(2);
    let (alice, mut events) = join(&hub, "Alice", "").await;
    wait_event(&mut events, WAIT, |e| *e == CollabEvent::ConnectionChanged(true)).await;

    // Queued in one go, so Alice's connection cannot keep up.
    let flooder = Uuid::new_v4();
    let raw = hub.open(DOC, flooder).await.unwrap();
    for _ in 0..32 {
        let ack = AckMessage {
            user_id: flooder,
            context: Default::default(),
        };
        let _ = raw.publish(BroadcastEvent::Ack(ack)).await;
    }

    wait_event(&mut events, WAIT, |e| *e == CollabEvent::ConnectionChanged(false)).await;
    wait_event(&mut events, Duration::from_secs(60), |e| {
        *e == CollabEvent::ConnectionChanged(true)
    })
    .await;
    assert_eq!(alice.connection_state().await, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_gives_up_after_max_attempts() {
    let hub = MemoryHub::new();
    let (alice, mut events) = join(&hub, "Alice", "").await;

    hub.set_online(false);
    hub.kick(DOC).await;

    let event = wait_event(&mut events, Duration::from_secs(600), |e| {
        matches!(e, CollabEvent::Error(_))
    })
    .await;
    assert_eq!(
        event,
        CollabEvent::Error(CollabError::ReconnectExhausted { attempts: 10 })
    );
    assert_eq!(hub.subscribe_attempts(), 11);
    assert_eq!(alice.connection_state().await, ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_connect_while_offline_retries_in_background() {
    let hub = MemoryHub::new();
    hub.set_online(false);

    let mut alice = CollabClient::new(
        hub.clone(),
        DOC,
        LocalUser::new("Alice"),
        "",
        ClientConfig::default(),
    );
    let mut events = alice.take_event_rx().unwrap();

    // A transient failure is not an error for the caller.
    alice.connect().await.unwrap();
    assert!(!alice.connection_state().await.is_connected());

    hub.set_online(true);
    wait_event(&mut events, Duration::from_secs(60), |e| {
        *e == CollabEvent::ConnectionChanged(true)
    })
    .await;
    assert_eq!(alice.connection_state().await, ConnectionState::Connected);
}
