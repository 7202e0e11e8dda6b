//! A client reconciler with an optimistic write queue in front of `add`.
//!
//! [`QueuedClient`] routes every newly loaded item through the queue: items
//! whose hash is waiting are the client's own appends coming back and are
//! reported through [`QueueDelegate::on_append_sent`]; everything else is
//! reported through [`QueueDelegate::on_new_added`].
//!
//! Sending never spawns work. [`QueuedClient::flush`] sends batches until the
//! queue is empty or a batch fails; a failure the delegate wants retried
//! yields a [`RetryTicket`]. Waiting on the ticket and passing it to
//! [`QueuedClient::resume`] continues, unless another flush happened in the
//! meantime, which makes the ticket stale.

use bytes::Bytes;
use parking_lot::Mutex;
use std::time::Duration;

use crate::{
    client::{ArraySyncClient, ClientChanges, SyncDelegate},
    collections::Indexed,
    config::SyncConfig,
    error::{Error, Result},
    message::{Notification, WireItem},
    queue::{ArraySyncQueue, HashedItem},
    remote::SyncRemote,
};

#[cfg(feature = "metrics")]
use crate::metrics;

/// Delegate trait for a [`QueuedClient`].
#[auto_impl::auto_impl(Box, Arc)]
pub trait QueueDelegate<T>: Send + Sync + 'static {
    /// Items appended by somebody else were loaded.
    fn on_new_added(&self, items: &Indexed<Vec<T>>);

    /// Items this client queued came back from the server.
    fn on_append_sent(&self, _items: &Indexed<Vec<T>>) {}

    /// Loaded items changed value.
    fn on_updated(&self, _new: &Indexed<Vec<T>>, _old: &Indexed<Vec<T>>) {}

    /// The view was thrown away.
    fn on_reset(&self) {}

    /// Decide whether a failed append batch should be retried.
    fn process_error(&self, error: &Error) -> bool {
        error.is_transient()
    }

    /// An append batch was given up on.
    fn on_append_dropped(&self, _items: &[T], _error: &Error) {}
}

/// Splits loaded items into own echoes and foreign appends.
pub struct QueueRouter<T, D> {
    queue: Mutex<ArraySyncQueue<T>>,
    delegate: D,
}

impl<T, D> QueueRouter<T, D> {
    /// The wrapped delegate.
    pub fn delegate(&self) -> &D {
        &self.delegate
    }
}

impl<T, D> SyncDelegate<T> for QueueRouter<T, D>
where
    T: HashedItem + Clone + Send + Sync + 'static,
    D: QueueDelegate<T>,
{
    fn on_added(&self, items: &Indexed<Vec<T>>) {
        let mut queue = self.queue.lock();
        let mut runs: Vec<(bool, Indexed<Vec<T>>)> = Vec::new();
        for item in items.iter() {
            let own = queue.take_waiting(item.value.sync_hash());
            match runs.last_mut() {
                Some((kind, run)) if *kind == own => run.value.push(item.value.clone()),
                _ => runs.push((own, Indexed::new(item.index, vec![item.value.clone()]))),
            }
        }
        drop(queue);

        for (own, run) in runs {
            if own {
                #[cfg(feature = "metrics")]
                metrics::record_echo_suppressed(run.value.len());
                tracing::trace!(range = ?run.range(), "own appends echoed");
                self.delegate.on_append_sent(&run);
            } else {
                self.delegate.on_new_added(&run);
            }
        }
    }

    fn on_updated(&self, new: &Indexed<Vec<T>>, old: &Indexed<Vec<T>>) {
        self.delegate.on_updated(new, old);
    }

    fn on_reset(&self) {
        self.queue.lock().forget_settled();
        self.delegate.on_reset();
    }
}

/// Proof that a retry was scheduled by a specific flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryTicket {
    generation: u64,
    delay: Duration,
}

impl RetryTicket {
    /// Backoff to wait before resuming.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Sleep for the backoff.
    pub async fn wait(&self) {
        futures_timer::Delay::new(self.delay).await;
    }
}

/// Result of a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Everything queued has been sent or dropped.
    Idle,
    /// A batch failed and should be retried with the ticket.
    Retry(RetryTicket),
    /// The ticket was invalidated by a later flush; nothing was sent.
    Superseded,
}

/// Client reconciler with optimistic appends.
pub struct QueuedClient<T, R, D> {
    client: ArraySyncClient<T, R, QueueRouter<T, D>>,
    config: SyncConfig,
    generation: u64,
}

impl<T, R, D> QueuedClient<T, R, D>
where
    T: HashedItem + Clone + PartialEq + Send + Sync + 'static,
    R: SyncRemote<T>,
    D: QueueDelegate<T>,
{
    /// Create a client with an empty queue.
    pub fn new(remote: R, delegate: D, config: SyncConfig) -> Result<Self> {
        Self::with_queue(remote, delegate, config, ArraySyncQueue::new())
    }

    /// Create a client around an existing (for example restored) queue.
    pub fn with_queue(
        remote: R,
        delegate: D,
        config: SyncConfig,
        queue: ArraySyncQueue<T>,
    ) -> Result<Self> {
        config.validate()?;
        let router = QueueRouter {
            queue: Mutex::new(queue),
            delegate,
        };
        Ok(Self {
            client: ArraySyncClient::new(remote, router),
            config,
            generation: 0,
        })
    }

    /// The underlying reconciler.
    pub fn client(&self) -> &ArraySyncClient<T, R, QueueRouter<T, D>> {
        &self.client
    }

    /// The underlying reconciler, mutably.
    pub fn client_mut(&mut self) -> &mut ArraySyncClient<T, R, QueueRouter<T, D>> {
        &mut self.client
    }

    /// The delegate.
    pub fn delegate(&self) -> &D {
        &self.client.delegate().delegate
    }

    /// Run `f` with the queue locked.
    pub fn with_queue_ref<O>(&self, f: impl FnOnce(&ArraySyncQueue<T>) -> O) -> O {
        f(&self.client.delegate().queue.lock())
    }

    /// Fetch new items and edits.
    pub async fn load_new(&mut self) -> Result<ClientChanges> {
        self.client.load_new().await
    }

    /// Fetch a page of history.
    pub async fn load_previous(&mut self) -> Result<ClientChanges> {
        self.client.load_previous().await
    }

    /// Apply a server notification.
    pub fn handle_notification(&mut self, notification: Notification<T>) -> ClientChanges {
        self.client.handle_notification(notification)
    }

    /// Stamp and queue `items` without sending; returns their hashes.
    ///
    /// Use [`append`](Self::append) to also send when no batch is in flight.
    pub fn queued_append(&self, items: Vec<T>) -> Vec<u64> {
        let mut queue = self.client.delegate().queue.lock();
        let hashes = queue.push(items);
        #[cfg(feature = "metrics")]
        metrics::set_append_queue_depth(queue.len());
        hashes
    }

    /// Queue `items` and send everything queued.
    pub async fn append(&mut self, items: Vec<T>) -> SendOutcome {
        self.queued_append(items);
        self.flush().await
    }

    /// Send queued batches until the queue is empty or a batch must wait.
    ///
    /// Invalidates every previously issued [`RetryTicket`].
    pub async fn flush(&mut self) -> SendOutcome {
        self.generation += 1;
        loop {
            let batch = {
                let mut queue = self.client.delegate().queue.lock();
                queue.begin_send(self.config.max_append_batch)
            };
            let Some(batch) = batch else {
                return SendOutcome::Idle;
            };

            let count = batch.len();
            match self.client.add(batch).await {
                Ok(first) => {
                    let mut queue = self.client.delegate().queue.lock();
                    queue.complete_send();
                    #[cfg(feature = "metrics")]
                    metrics::set_append_queue_depth(queue.len());
                    tracing::trace!(first, count, "append batch acknowledged");
                }
                Err(err) => {
                    let router = self.client.delegate();
                    if router.delegate.process_error(&err) {
                        #[cfg(feature = "metrics")]
                        metrics::record_append_retry();
                        tracing::warn!(count, error = %err, "append batch failed, retrying");
                        return SendOutcome::Retry(RetryTicket {
                            generation: self.generation,
                            delay: self.config.retry_backoff,
                        });
                    }

                    let dropped = router.queue.lock().drop_sending();
                    #[cfg(feature = "metrics")]
                    metrics::record_append_dropped();
                    tracing::warn!(count, error = %err, "append batch dropped");
                    router.delegate.on_append_dropped(&dropped, &err);
                }
            }
        }
    }

    /// Continue after a retry backoff.
    pub async fn resume(&mut self, ticket: RetryTicket) -> SendOutcome {
        if ticket.generation != self.generation {
            tracing::debug!(
                ticket = ticket.generation,
                current = self.generation,
                "stale retry ticket"
            );
            return SendOutcome::Superseded;
        }
        self.flush().await
    }

    /// Flush, sleeping through up to `max_retries` backoffs.
    pub async fn flush_with_retries(&mut self, max_retries: usize) -> SendOutcome {
        let mut outcome = self.flush().await;
        for _ in 0..max_retries {
            let SendOutcome::Retry(ticket) = outcome else {
                break;
            };
            ticket.wait().await;
            outcome = self.resume(ticket).await;
        }
        outcome
    }
}

impl<T, R, D> QueuedClient<T, R, D>
where
    T: HashedItem + WireItem + Clone + PartialEq + Send + Sync + 'static,
    R: SyncRemote<T>,
    D: QueueDelegate<T>,
{
    /// Apply an encoded notification frame.
    pub fn handle_notification_frame(&mut self, frame: &[u8]) -> Result<ClientChanges> {
        self.client.handle_notification_frame(frame)
    }

    /// Encode the write queue for persistence.
    pub fn save_queue(&self) -> Bytes {
        self.with_queue_ref(ArraySyncQueue::save)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        message::{Cleared, Header, ItemsAdded},
        remote::LocalRemote,
        server::{ArraySyncServer, LastWriteWins, SharedServer},
        testing::{FlakyRemote, RecordingDelegate, SyncEvent},
    };

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Entry {
        hash: u64,
        body: u32,
    }

    impl HashedItem for Entry {
        fn sync_hash(&self) -> u64 {
            self.hash
        }

        fn set_sync_hash(&mut self, hash: u64) {
            self.hash = hash;
        }
    }

    impl WireItem for Entry {
        fn encode(&self, buf: &mut impl bytes::BufMut) {
            self.hash.encode(buf);
            self.body.encode(buf);
        }

        fn decode(buf: &mut impl bytes::Buf) -> Option<Self> {
            Some(Entry {
                hash: u64::decode(buf)?,
                body: u32::decode(buf)?,
            })
        }

        fn encoded_len(&self) -> usize {
            12
        }
    }

    fn entries(bodies: &[u32]) -> Vec<Entry> {
        bodies.iter().map(|&body| Entry { hash: 0, body }).collect()
    }

    fn shared_server() -> SharedServer<Entry> {
        ArraySyncServer::with_config(SyncConfig::default())
            .unwrap()
            .into_shared()
    }

    type Local = LocalRemote<Entry, LastWriteWins>;

    fn queued(server: &SharedServer<Entry>) -> (QueuedClient<Entry, Local, RecordingDelegate<Entry>>, RecordingDelegate<Entry>) {
        let delegate = RecordingDelegate::new();
        let client = QueuedClient::with_queue(
            LocalRemote::new(server.clone()),
            delegate.clone(),
            SyncConfig::default(),
            ArraySyncQueue::with_seed(1000),
        )
        .unwrap();
        (client, delegate)
    }

    #[tokio::test]
    async fn test_own_echo_is_suppressed() {
        let server = shared_server();
        let rx = LocalRemote::new(server.clone()).subscribe();
        let (mut client, delegate) = queued(&server);

        assert_eq!(client.append(entries(&[1, 2, 3])).await, SendOutcome::Idle);
        assert_eq!(client.with_queue_ref(|q| q.waiting().len()), 3);

        client.handle_notification(rx.try_recv().unwrap());
        assert_eq!(delegate.sent_ranges(), vec![0..3]);
        assert!(delegate.new_added_ranges().is_empty());
        assert!(client.with_queue_ref(|q| q.waiting().is_empty()));
    }

    #[tokio::test]
    async fn test_foreign_items_leave_waiting_untouched() {
        let server = shared_server();
        let rx = LocalRemote::new(server.clone()).subscribe();
        let (mut client, delegate) = queued(&server);
        client.queued_append(entries(&[1]));
        client.flush().await;
        rx.try_recv().unwrap();

        let foreign = Notification::Added(ItemsAdded {
            header: Header::new(0, 3, 0),
            data: Indexed::new(1, vec![Entry { hash: 7, body: 9 }, Entry { hash: 8, body: 9 }]),
        });
        client.handle_notification(foreign);
        assert_eq!(delegate.new_added_ranges(), vec![1..3]);
        assert_eq!(client.with_queue_ref(|q| q.waiting().to_vec()), vec![1001]);
    }

    #[tokio::test]
    async fn test_mixed_echo_splits_into_runs() {
        let server = shared_server();
        let (client, delegate) = queued(&server);
        let hashes = client.queued_append(entries(&[1, 2]));
        client
            .client()
            .delegate()
            .queue
            .lock()
            .begin_send(0)
            .unwrap();

        let router = client.client().delegate();
        router.on_added(&Indexed::new(
            5,
            vec![
                Entry { hash: hashes[0], body: 1 },
                Entry { hash: 42, body: 0 },
                Entry { hash: hashes[1], body: 2 },
            ],
        ));
        assert_eq!(delegate.sent_ranges(), vec![5..6, 7..8]);
        assert_eq!(delegate.new_added_ranges(), vec![6..7]);
    }

    #[tokio::test]
    async fn test_transient_failure_yields_ticket() {
        let server = shared_server();
        let remote = FlakyRemote::new(LocalRemote::new(server.clone()), 1, Error::Transport("down".into()));
        let delegate = RecordingDelegate::new();
        let mut client = QueuedClient::new(
            remote,
            delegate.clone(),
            SyncConfig::default().with_retry_backoff(Duration::from_millis(1)),
        )
        .unwrap();

        let SendOutcome::Retry(ticket) = client.append(entries(&[1, 2])).await else {
            panic!("expected a retry");
        };
        assert_eq!(ticket.delay(), Duration::from_millis(1));
        assert_eq!(client.with_queue_ref(|q| q.sending().len()), 2);

        ticket.wait().await;
        assert_eq!(client.resume(ticket).await, SendOutcome::Idle);
        assert_eq!(server.lock().len(), 2);
        assert!(client.with_queue_ref(|q| q.is_empty()));
    }

    #[tokio::test]
    async fn test_new_flush_supersedes_ticket() {
        let server = shared_server();
        let remote = FlakyRemote::new(LocalRemote::new(server.clone()), 1, Error::Closed);
        let (mut client, _delegate) = {
            let delegate = RecordingDelegate::new();
            let client = QueuedClient::new(remote, delegate.clone(), SyncConfig::default()).unwrap();
            (client, delegate)
        };

        let SendOutcome::Retry(ticket) = client.append(entries(&[1])).await else {
            panic!("expected a retry");
        };
        assert_eq!(client.flush().await, SendOutcome::Idle);
        assert_eq!(client.resume(ticket).await, SendOutcome::Superseded);
        assert_eq!(server.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_batch_is_dropped() {
        let server = shared_server();
        let remote = FlakyRemote::new(LocalRemote::new(server.clone()), 1, Error::Rejected("spam".into()));
        let delegate = RecordingDelegate::new();
        let mut client = QueuedClient::new(remote, delegate.clone(), SyncConfig::default()).unwrap();

        client.queued_append(entries(&[1]));
        assert_eq!(client.flush().await, SendOutcome::Idle);
        assert_eq!(delegate.dropped(), vec![(1, Error::Rejected("spam".into()))]);
        assert!(client.with_queue_ref(|q| q.waiting().is_empty()));

        // The next batch goes through.
        assert_eq!(client.append(entries(&[2])).await, SendOutcome::Idle);
        assert_eq!(server.lock().items()[0].body, 2);
    }

    #[tokio::test]
    async fn test_process_error_override_drops_transient_failures() {
        let server = shared_server();
        let remote = FlakyRemote::new(LocalRemote::new(server.clone()), 1, Error::Transport("down".into()));
        let delegate = RecordingDelegate::new().with_retry(false);
        let mut client = QueuedClient::new(remote, delegate.clone(), SyncConfig::default()).unwrap();

        assert_eq!(client.append(entries(&[1])).await, SendOutcome::Idle);
        assert_eq!(delegate.dropped().len(), 1);
        assert!(server.lock().is_empty());
    }

    #[tokio::test]
    async fn test_batches_respect_max_append_batch() {
        let server = shared_server();
        let rx = LocalRemote::new(server.clone()).subscribe();
        let mut client = QueuedClient::new(
            LocalRemote::new(server.clone()),
            RecordingDelegate::new(),
            SyncConfig::default().with_max_append_batch(2),
        )
        .unwrap();

        client.append(entries(&[1, 2, 3, 4, 5])).await;
        let sizes: Vec<u64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|n| match n {
                Notification::Added(added) => added.data.len(),
                _ => 0,
            })
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_echo_through_load_new_before_notification() {
        let server = shared_server();
        let rx = LocalRemote::new(server.clone()).subscribe();
        let (mut client, delegate) = queued(&server);
        client.append(entries(&[1, 2])).await;

        client.load_new().await.unwrap();
        client.handle_notification(rx.try_recv().unwrap());
        assert_eq!(delegate.sent_ranges(), vec![0..2]);
        assert!(delegate.new_added_ranges().is_empty());
        assert!(!delegate.events().contains(&SyncEvent::Reset));
    }

    #[tokio::test]
    async fn test_reset_forgets_settled_echoes() {
        let server = shared_server();
        let (mut client, delegate) = queued(&server);
        client.append(entries(&[1, 2])).await;
        client.queued_append(entries(&[3]));
        client.client().delegate().queue.lock().begin_send(0);
        assert_eq!(client.with_queue_ref(|q| q.waiting().to_vec()), vec![1001, 1002, 1003]);

        // The echo of the first batch is lost to the clear.
        server.lock().clear();
        client.handle_notification(Notification::Cleared(Cleared { version: 1 }));
        assert_eq!(delegate.resets(), 1);
        assert_eq!(client.with_queue_ref(|q| q.waiting().to_vec()), vec![1003]);
    }

    #[tokio::test]
    async fn test_restored_queue_resends_in_flight_batch() {
        let server = shared_server();
        let (client, _delegate) = queued(&server);
        client.queued_append(entries(&[1, 2, 3]));
        client.client().delegate().queue.lock().begin_send(1);
        let saved = client.save_queue();

        let restored = ArraySyncQueue::<Entry>::load(&saved).unwrap();
        let mut client = QueuedClient::with_queue(
            LocalRemote::new(server.clone()),
            RecordingDelegate::new(),
            SyncConfig::default().with_max_append_batch(1),
            restored,
        )
        .unwrap();
        assert_eq!(client.flush().await, SendOutcome::Idle);
        let bodies: Vec<u32> = server.lock().items().iter().map(|e| e.body).collect();
        assert_eq!(bodies, vec![1, 2, 3]);
    }
}
