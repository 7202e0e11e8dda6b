//! End-to-end tests over the RPC path.
//!
//! Every client talks to the server through a [`ServerRunner`] connected by
//! in-process channel transports, so requests, acknowledgements and
//! notifications all go through their wire encodings.
//!
//! # Test Scenarios
//!
//! | Scenario | Description |
//! |----------|-------------|
//! | Append, edit, clear | Two clients follow each other's writes through notifications |
//! | Edit catch-up | A client that missed notifications gets edits bundled with `load_new` |
//! | Rejections | Policy rejections and out-of-range edits surface as errors |
//! | Retries | A flaky write path is retried until the batch lands |
//! | Snapshots | A restored client continues from the saved cursor |
//! | Chat | Unread counts follow messages and read cursors |

mod common;

use common::{notes, numbers_server, Note};
use std::time::Duration;
use windowed_sync::testing::{FlakyRemote, RecordingDelegate};
use windowed_sync::{
    connect_in_process, ArraySyncClient, ArraySyncServer, ChannelTransport, ChatMessage,
    ChatSession, Error, Indexed, ItemPolicy, NoopDelegate, NotFromReader, QueuedClient,
    RpcRemote, SendOutcome, SharedServer, SyncConfig, Transport,
};

/// Connect a new client to `server` and spawn its runner.
fn spawn_connection<T, P>(
    server: &SharedServer<T, P>,
) -> (RpcRemote<T, ChannelTransport>, ChannelTransport)
where
    T: windowed_sync::WireItem + Clone + Send + Sync + 'static,
    P: ItemPolicy<T>,
{
    let (runner, remote, notifications) = connect_in_process(server, 32);
    tokio::spawn(runner.run());
    (remote, notifications)
}

#[tokio::test]
async fn test_two_clients_follow_writes() {
    common::setup_logging();
    let server = common::server::<Note>(4);
    let (remote_a, notify_a) = spawn_connection(&server);
    let (remote_b, notify_b) = spawn_connection(&server);

    let alice_events = RecordingDelegate::new();
    let mut alice = QueuedClient::new(
        remote_a,
        alice_events.clone(),
        SyncConfig::new().with_block_size(4),
    )
    .unwrap();
    let bob_events = RecordingDelegate::new();
    let mut bob = ArraySyncClient::new(remote_b, bob_events.clone());

    // Append: alice sees her own echo, bob sees new items.
    assert_eq!(alice.append(notes(&["hi", "yo"])).await, SendOutcome::Idle);
    alice
        .handle_notification_frame(&notify_a.recv().await.unwrap())
        .unwrap();
    assert_eq!(alice_events.sent_ranges(), vec![0..2]);
    assert!(alice_events.new_added_ranges().is_empty());

    let changes = bob
        .handle_notification_frame(&notify_b.recv().await.unwrap())
        .unwrap();
    assert_eq!(changes.added.to_vec(), vec![0..2]);
    assert_eq!(bob_events.added_ranges(), vec![0..2]);
    assert_eq!(bob.header().items_count, 2);
    assert_eq!(bob.items().get(1).map(|n| n.text.as_str()), Some("yo"));

    // Edit: bob fixes the first note, alice sees the change.
    let mut edited = bob.items().get(0).cloned().unwrap();
    edited.text = "hello".into();
    bob.update_item(Indexed::new(0, edited)).await.unwrap();

    alice
        .handle_notification_frame(&notify_a.recv().await.unwrap())
        .unwrap();
    assert_eq!(alice_events.updated_ranges(), vec![0..1]);
    assert_eq!(
        alice.client().items().get(0).map(|n| n.text.as_str()),
        Some("hello")
    );

    // Clear: both views reset to the new version.
    bob.clear().await.unwrap();
    bob.handle_notification_frame(&notify_b.recv().await.unwrap())
        .unwrap();
    bob.handle_notification_frame(&notify_b.recv().await.unwrap())
        .unwrap();
    alice
        .handle_notification_frame(&notify_a.recv().await.unwrap())
        .unwrap();

    assert_eq!(alice_events.resets(), 1);
    assert_eq!(bob_events.resets(), 1);
    assert!(alice.client().items().is_empty());
    assert_eq!(alice.client().header().version, 1);
    assert!(alice.load_new().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_load_new_bundles_missed_edits() {
    let server = numbers_server(6, 4);
    let (remote, _notifications) = spawn_connection(&server);
    let events = RecordingDelegate::new();
    let mut client = ArraySyncClient::new(remote, events.clone());

    assert_eq!(client.load_new().await.unwrap().added.to_vec(), vec![0..4]);

    // Edits below and above the cursor; only the loaded one is bundled.
    server.lock().update(Indexed::new(1, vec![10])).unwrap();
    server.lock().update(Indexed::new(5, vec![50])).unwrap();
    server.lock().update(Indexed::new(1, vec![11])).unwrap();

    let changes = client.load_new().await.unwrap();
    assert_eq!(changes.added.to_vec(), vec![4..6]);
    assert_eq!(changes.updated, vec![1..2]);
    assert_eq!(client.items().ranges()[0].value, vec![0, 11, 2, 3, 4, 50]);
    assert_eq!(client.header().updates_size, 3);
    assert_eq!(events.updated_ranges(), vec![1..2]);
}

struct NonEmpty;

impl ItemPolicy<String> for NonEmpty {
    fn validate(&self, item: &String) -> Result<(), String> {
        if item.is_empty() {
            Err("empty item".to_string())
        } else {
            Ok(())
        }
    }
}

#[tokio::test]
async fn test_write_failures_cross_the_wire() {
    let server = ArraySyncServer::<String, NonEmpty>::new(SyncConfig::default(), NonEmpty)
        .unwrap()
        .into_shared();
    let (remote, _notifications) = spawn_connection(&server);
    let client = ArraySyncClient::new(remote, NoopDelegate);

    assert_eq!(client.add(vec!["a".into(), "b".into()]).await, Ok(0));
    assert_eq!(client.add_item("c".into()).await, Ok(2));

    match client.add(vec!["d".into(), String::new()]).await {
        Err(Error::Rejected(reason)) => assert_eq!(reason, "empty item"),
        other => panic!("expected rejection, got {:?}", other),
    }
    assert_eq!(server.lock().len(), 3);

    match client.update(Indexed::new(2, vec!["x".into(), "y".into()])).await {
        Err(Error::OutOfRange { start, end, len }) => {
            assert_eq!((start, end, len), (2, 4, 3));
        }
        other => panic!("expected out of range, got {:?}", other),
    }
}

#[tokio::test]
async fn test_flaky_appends_are_retried() {
    let server = common::server::<Note>(8);
    let (remote, notifications) = spawn_connection(&server);
    let flaky = FlakyRemote::new(remote, 2, Error::Transport("link down".into()));
    let events = RecordingDelegate::new();
    let config = SyncConfig::new().with_retry_backoff(Duration::from_millis(5));
    let mut client = QueuedClient::new(flaky, events.clone(), config).unwrap();

    match client.append(notes(&["a", "b", "c"])).await {
        SendOutcome::Retry(ticket) => assert_eq!(ticket.delay(), Duration::from_millis(5)),
        other => panic!("expected a retry, got {:?}", other),
    }
    assert_eq!(client.flush_with_retries(3).await, SendOutcome::Idle);

    let stats = client.client().remote().stats();
    assert_eq!(stats.adds_delivered(), 1);
    assert_eq!(server.lock().len(), 3);

    client
        .handle_notification_frame(&notifications.recv().await.unwrap())
        .unwrap();
    assert_eq!(events.sent_ranges(), vec![0..3]);
    assert!(events.dropped().is_empty());
}

#[tokio::test]
async fn test_restored_client_continues_from_cursor() {
    let server = numbers_server(10, 4);
    let (remote, _notifications) = spawn_connection(&server);
    let mut client = ArraySyncClient::new(remote, NoopDelegate);
    client.load_new().await.unwrap();
    let snapshot = client.snapshot();

    let (remote, _notifications) = spawn_connection(&server);
    let events = RecordingDelegate::new();
    let mut restored = ArraySyncClient::new(remote, events.clone());
    let changes = restored.restore(&snapshot).unwrap();
    assert!(changes.reset);
    assert_eq!(events.added_ranges(), vec![0..4]);
    assert_eq!(restored.header(), client.header());

    let changes = restored.load_new().await.unwrap();
    assert_eq!(changes.added.to_vec(), vec![4..8]);
    assert!(restored.restore(&snapshot[..5]).is_err());
    assert_eq!(restored.items().ranges()[0].range(), 0..8);
}

type ChatRemote = RpcRemote<ChatMessage<String>, ChannelTransport>;

#[tokio::test]
async fn test_chat_unread_over_rpc() {
    let server = common::server::<ChatMessage<String>>(50);
    let (remote_a, _notify_a) = spawn_connection(&server);
    let (remote_b, notify_b) = spawn_connection(&server);

    let session = |remote: ChatRemote, id: u64| {
        let client = QueuedClient::new(remote, RecordingDelegate::new(), SyncConfig::default())
            .unwrap();
        ChatSession::new(client, id, NotFromReader)
    };
    let mut alice = session(remote_a, 1);
    let mut bob = session(remote_b, 2);

    alice.send(vec!["ping".into(), "anyone?".into()]).await;
    bob.client_mut().load_new().await.unwrap();

    let unread = bob.unread();
    assert_eq!(unread.count, 2);
    assert!(unread.exact_preview);
    assert!(unread.last_message.is_none());

    // Bob's own reply never counts for him and becomes his preview.
    bob.send(vec!["pong".into()]).await;
    for _ in 0..2 {
        let frame = notify_b.recv().await.unwrap();
        bob.client_mut().handle_notification_frame(&frame).unwrap();
    }
    let unread = bob.unread();
    assert_eq!(unread.count, 2);
    assert_eq!(unread.last_message.unwrap().value.content, "pong");

    assert_eq!(bob.mark_read(3).map(|p| p.last_read), Some(3));
    assert_eq!(bob.unread().count, 0);
    // Alice has read nothing but wrote two of the three messages.
    let alice_view = bob.unread_for(&windowed_sync::Participant::new(1));
    assert_eq!(alice_view.count, 1);
    assert!(alice.mark_read(1).is_none());
}
