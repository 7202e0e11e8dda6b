//! Protocol property tests.
//!
//! These tests pin down the behavior every implementation of the windowed
//! sync protocol must show:
//! 1. Merging: re-inserting a window is idempotent; overlapping windows
//!    cascade into one without gaps
//! 2. Paging: forward paging from an empty cursor, backward paging from the
//!    newest page, both covering the whole sequence
//! 3. Echo suppression: own appends coming back are told apart from foreign
//!    ones by their hash
//! 4. Resets: a version bump always throws the client view away

mod common;

use common::{notes, numbers_server, Note};
use windowed_sync::testing::RecordingDelegate;
use windowed_sync::{
    ArraySyncClient, ArraySyncQueue, Indexed, LoadNewRequest, LocalRemote, NoopDelegate,
    PartialSet, QueuedClient, SendOutcome, SyncConfig, SyncRemote,
};

// =============================================================================
// Interval set merging
// =============================================================================

#[test]
fn test_reinsert_same_values_reports_nothing() {
    let mut set = PartialSet::new();
    let first = set.insert(Indexed::new(2, vec![1u64, 2, 3]));
    assert_eq!(first.new_spans.to_vec(), vec![2..5]);

    let again = set.insert(Indexed::new(2, vec![1, 2, 3]));
    assert_eq!(again.combined, 2..5);
    assert!(again.changed.is_empty());
    assert!(!again.has_new());
    assert_eq!(set.ranges(), &[Indexed::new(2, vec![1, 2, 3])]);
}

#[test]
fn test_reinsert_different_values_reports_one_pair() {
    let mut set = PartialSet::new();
    set.insert(Indexed::new(2, vec![1u64, 2, 3]));

    let result = set.insert(Indexed::new(2, vec![7, 8, 9]));
    assert_eq!(result.combined, 2..5);
    assert_eq!(result.changed.len(), 1);
    assert_eq!(result.changed[0].old, Indexed::new(2, vec![1, 2, 3]));
    assert_eq!(result.changed[0].new, Indexed::new(2, vec![7, 8, 9]));
    assert_eq!(set.get(3), Some(&8));
}

#[test]
fn test_cascade_onto_rightmost_leaves_one_range() {
    let mut set = PartialSet::new();
    let mut end = 0u64;
    for step in 0..40u64 {
        // Alternate between touching, overlapping and covering the tail.
        let start = end.saturating_sub(step % 4);
        let len = 1 + step % 5;
        let values: Vec<u64> = (start..start + len).collect();
        set.insert(Indexed::new(start, values));
        end = end.max(start + len);

        assert_eq!(set.len(), 1, "gap after step {}: {}", step, set);
        assert_eq!(set.ranges()[0].range(), 0..end);
    }
}

#[test]
fn test_bridging_insert_swallows_every_window() {
    let mut set = PartialSet::new();
    for start in [0u64, 4, 8, 12] {
        set.insert(Indexed::new(start, vec![0u64; 2]));
    }
    assert_eq!(set.len(), 4);

    let result = set.insert(Indexed::new(1, vec![1u64; 12]));
    assert_eq!(set.len(), 1);
    assert_eq!(result.combined, 0..14);
    assert_eq!(result.new_spans.to_vec(), vec![2..4, 6..8, 10..12]);
    // Position 1 and 4..6, 8..10 and 12 held zeros before.
    assert_eq!(result.changed.len(), 4);
}

// =============================================================================
// Paging
// =============================================================================

#[tokio::test]
async fn test_forward_paging_ten_items_block_four() {
    common::setup_logging();
    let server = numbers_server(10, 4);
    let remote = LocalRemote::new(server.clone());

    let first = remote.load_new(LoadNewRequest::default()).await.unwrap();
    assert!(!first.should_reset);
    assert_eq!(first.data.range(), 0..4);
    assert_eq!(first.header.items_count, 10);

    let mut client = ArraySyncClient::new(remote, NoopDelegate);
    let mut pages = Vec::new();
    for _ in 0..3 {
        let changes = client.load_new().await.unwrap();
        assert!(!changes.reset);
        pages.push(changes.added.to_vec());
    }

    assert_eq!(pages, vec![vec![0..4], vec![4..8], vec![8..10]]);
    assert_eq!(client.header().items_count, 10);
    assert_eq!(client.remote_header().items_count, 10);
    assert_eq!(client.items().len(), 1);

    // Caught up: nothing more to load.
    assert!(client.load_new().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_backward_paging_covers_sequence() {
    for (len, block) in [(10u64, 4usize), (12, 4), (1, 3), (7, 7), (100, 9)] {
        let server = numbers_server(len, block);
        let mut client = ArraySyncClient::new(LocalRemote::new(server), NoopDelegate);

        client.clear_cache().await.unwrap();
        let mut calls = 1u64;
        while client.has_more_previous() {
            client.load_previous().await.unwrap();
            calls += 1;
        }

        assert_eq!(calls, len.div_ceil(block as u64), "len {} block {}", len, block);
        assert_eq!(client.items().len(), 1);
        assert_eq!(client.items().ranges()[0].range(), 0..len);
        assert_eq!(
            client.items().ranges()[0].value,
            (0..len).collect::<Vec<_>>()
        );
    }
}

#[tokio::test]
async fn test_new_items_after_backward_paging() {
    let server = numbers_server(8, 4);
    let mut client = ArraySyncClient::new(LocalRemote::new(server.clone()), NoopDelegate);
    client.clear_cache().await.unwrap();
    assert_eq!(client.header().items_count, 8);

    server.lock().add(vec![8, 9]).unwrap();
    let changes = client.load_new().await.unwrap();
    assert_eq!(changes.added.to_vec(), vec![8..10]);
    assert_eq!(client.items().ranges()[0].range(), 4..10);
}

// =============================================================================
// Echo suppression
// =============================================================================

#[tokio::test]
async fn test_own_echo_is_not_new() {
    let server = common::server::<Note>(50);
    let notifications = server.lock().subscribe();
    let events = RecordingDelegate::new();
    let mut client = QueuedClient::with_queue(
        LocalRemote::new(server.clone()),
        events.clone(),
        SyncConfig::default(),
        ArraySyncQueue::with_seed(1000),
    )
    .unwrap();

    assert_eq!(
        client.append(notes(&["a", "b", "c"])).await,
        SendOutcome::Idle
    );
    assert_eq!(client.with_queue_ref(|q| q.waiting().len()), 3);

    let echo = notifications.try_recv().unwrap();
    client.handle_notification(echo);

    assert!(events.new_added_ranges().is_empty());
    assert_eq!(events.sent_ranges(), vec![0..3]);
    assert!(client.with_queue_ref(|q| q.waiting().is_empty()));
}

#[tokio::test]
async fn test_foreign_items_leave_wait_list_alone() {
    let server = common::server::<Note>(50);
    let notifications = server.lock().subscribe();
    let events = RecordingDelegate::new();
    let mut client = QueuedClient::with_queue(
        LocalRemote::new(server.clone()),
        events.clone(),
        SyncConfig::default(),
        ArraySyncQueue::with_seed(1000),
    )
    .unwrap();

    client.append(notes(&["mine", "also mine"])).await;
    server.lock().add(notes(&["x", "y", "z"])).unwrap();
    let own = notifications.try_recv().unwrap();
    let foreign = notifications.try_recv().unwrap();

    client.handle_notification(foreign);
    assert_eq!(events.new_added_ranges(), vec![2..5]);
    assert!(events.sent_ranges().is_empty());
    assert_eq!(client.with_queue_ref(|q| q.waiting().to_vec()), vec![1001, 1002]);

    client.handle_notification(own);
    assert_eq!(events.sent_ranges(), vec![0..2]);
    assert_eq!(client.client().items().len(), 1);
}

// =============================================================================
// Resets
// =============================================================================

#[tokio::test]
async fn test_clear_forces_reset_with_old_header() {
    let server = numbers_server(6, 4);
    let events = RecordingDelegate::new();
    let mut client = ArraySyncClient::new(LocalRemote::new(server.clone()), events.clone());
    client.load_new().await.unwrap();
    let stale = client.header();
    assert_eq!(stale.items_count, 4);

    server.lock().clear();

    let response = client
        .remote()
        .load_new(LoadNewRequest { header: stale })
        .await
        .unwrap();
    assert!(response.should_reset);
    assert_eq!(response.header.version, stale.version + 1);

    let changes = client.apply_load_new(response);
    assert!(changes.reset);
    assert!(client.items().is_empty());
    assert_eq!(events.resets(), 1);
    assert_eq!(client.header().version, stale.version + 1);

    // The fresh cursor syncs normally again.
    server.lock().add(vec![42]).unwrap();
    let changes = client.load_new().await.unwrap();
    assert!(!changes.reset);
    assert_eq!(client.items().get(0), Some(&42));
}

#[tokio::test]
async fn test_edit_backlog_forces_reset() {
    let config = SyncConfig::new().with_block_size(4).with_max_updates(2);
    let server = windowed_sync::ArraySyncServer::with_config(config)
        .unwrap()
        .into_shared();
    server.lock().add((0..4).collect()).unwrap();

    let mut client = ArraySyncClient::new(LocalRemote::new(server.clone()), NoopDelegate);
    client.load_new().await.unwrap();
    for i in 0..3u64 {
        server.lock().update(Indexed::new(i, vec![100 + i])).unwrap();
    }

    let changes = client.load_new().await.unwrap();
    assert!(changes.reset);
    assert_eq!(client.items().ranges()[0].value, vec![100, 101, 102, 3]);
    assert_eq!(client.header().updates_size, 3);
}
