use ahash::AHashMap;
use parking_lot::RwLock;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

use crate::content::{ContentType, IndexedDocument};
use crate::error::{Result, SearchError};
use crate::pipeline::message::{OperationKind, QueuedOperation};
use crate::pipeline::queue::QueueStore;

/// Looks up the live object a queued operation refers to
pub trait ObjectResolver: Send + Sync {
    /// `None` when the object no longer exists
    fn resolve(&self, docid: &str, content_type: ContentType) -> Result<Option<IndexedDocument>>;
}

/// Applies one decoded operation to its target index
pub trait IndexApplier: Send + Sync {
    /// `doc` is the resolved object for adds and updates, `None` for deletes
    fn apply(&self, op: &QueuedOperation, doc: Option<IndexedDocument>) -> Result<()>;
}

/// Objects held in memory, keyed by oid
#[derive(Debug, Default)]
pub struct MemoryObjects {
    objects: RwLock<AHashMap<String, IndexedDocument>>,
}

impl MemoryObjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, doc: IndexedDocument) {
        self.objects.write().insert(doc.oid.clone(), doc);
    }

    pub fn remove(&self, oid: &str) -> Option<IndexedDocument> {
        self.objects.write().remove(oid)
    }
}

impl ObjectResolver for MemoryObjects {
    fn resolve(&self, docid: &str, content_type: ContentType) -> Result<Option<IndexedDocument>> {
        Ok(self
            .objects
            .read()
            .get(docid)
            .filter(|d| d.content_type == content_type)
            .cloned())
    }
}

/// Objects stored as `<oid>.json` files in a directory
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    dir: PathBuf,
}

impl DirectoryResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, docid: &str) -> PathBuf {
        let file: String = docid
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.dir.join(format!("{}.json", file))
    }
}

impl ObjectResolver for DirectoryResolver {
    fn resolve(&self, docid: &str, content_type: ContentType) -> Result<Option<IndexedDocument>> {
        let path = self.path_for(docid);
        if !path.exists() {
            return Ok(None);
        }
        let mut doc: IndexedDocument = serde_json::from_slice(&fs::read(&path)?)?;
        if doc.oid.is_empty() {
            doc.oid = docid.to_string();
        }
        doc.content_type = content_type;
        Ok(Some(doc))
    }
}

/// Outcome of processing one or more drained batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub applied: usize,
    /// Target object no longer exists
    pub skipped: usize,
    pub expired: usize,
    /// Undecodable messages
    pub dropped: usize,
    /// Messages returned to the queue after a failure
    pub requeued: usize,
}

impl BatchStats {
    fn absorb(&mut self, other: BatchStats) {
        self.applied += other.applied;
        self.skipped += other.skipped;
        self.expired += other.expired;
        self.dropped += other.dropped;
        self.requeued += other.requeued;
    }

    pub fn is_empty(&self) -> bool {
        *self == BatchStats::default()
    }
}

/// Drains queues and applies their operations
pub struct QueueConsumer {
    store: Arc<dyn QueueStore>,
    resolver: Arc<dyn ObjectResolver>,
    applier: Arc<dyn IndexApplier>,
}

impl QueueConsumer {
    pub fn new(
        store: Arc<dyn QueueStore>,
        resolver: Arc<dyn ObjectResolver>,
        applier: Arc<dyn IndexApplier>,
    ) -> Self {
        Self {
            store,
            resolver,
            applier,
        }
    }

    /// Drain one queue and apply it in order.
    ///
    /// On the first failure the failing message and everything after it
    /// go back to the head of the queue; the error is logged, not returned.
    /// The batch is acknowledged only once every message is applied or
    /// requeued. Queue-store errors propagate, and then the whole batch is
    /// released for redelivery.
    pub fn process_queue(&self, queue: &str) -> Result<BatchStats> {
        let messages = match self.store.drain(queue) {
            Ok(messages) => messages,
            Err(e) => {
                self.store.release(queue);
                return Err(e);
            }
        };
        let mut stats = BatchStats::default();
        if messages.is_empty() {
            self.store.acknowledge(queue)?;
            return Ok(stats);
        }
        debug!(queue, batch = messages.len(), "drained queue");

        let now = unix_now();
        for (i, raw) in messages.iter().enumerate() {
            let op = match QueuedOperation::decode(raw) {
                Ok(op) => op,
                Err(e) => {
                    warn!(queue, error = %e, "dropping undecodable message");
                    stats.dropped += 1;
                    continue;
                }
            };

            if op.is_expired(now) {
                warn!(queue, docid = %op.docid, kind = %op.kind, "dropping expired message");
                stats.expired += 1;
                continue;
            }

            match self.apply_one(&op) {
                Ok(true) => stats.applied += 1,
                Ok(false) => stats.skipped += 1,
                Err(e) => {
                    let remainder = messages[i..].to_vec();
                    stats.requeued = remainder.len();
                    error!(
                        queue,
                        docid = %op.docid,
                        requeued = stats.requeued,
                        error = %e,
                        "failed to apply queued operation"
                    );
                    if let Err(requeue) = self.store.push_front(queue, remainder) {
                        error!(
                            queue,
                            error = %requeue,
                            "could not requeue remainder, batch kept for redelivery"
                        );
                        self.store.release(queue);
                        return Err(requeue);
                    }
                    break;
                }
            }
        }

        self.store.acknowledge(queue)?;
        info!(
            queue,
            applied = stats.applied,
            skipped = stats.skipped,
            expired = stats.expired,
            requeued = stats.requeued,
            "processed queue batch"
        );
        Ok(stats)
    }

    /// Process every queue that currently holds messages
    pub fn process_all(&self) -> Result<BatchStats> {
        let mut total = BatchStats::default();
        for queue in self.store.queues()? {
            total.absorb(self.process_queue(&queue)?);
        }
        Ok(total)
    }

    /// Returns false when the operation was skipped
    fn apply_one(&self, op: &QueuedOperation) -> Result<bool> {
        let doc = match op.kind {
            OperationKind::Delete => None,
            OperationKind::Add | OperationKind::Update => {
                match self.resolver.resolve(&op.docid, op.content_type)? {
                    Some(doc) => Some(doc),
                    None => {
                        let missing = SearchError::BrokenReference {
                            entity: op.entity.clone(),
                            docid: op.docid.clone(),
                        };
                        debug!(error = %missing, "skipping operation");
                        return Ok(false);
                    }
                }
            }
        };
        self.applier.apply(op, doc)?;
        Ok(true)
    }

    /// Poll all queues on a fixed interval in a background thread
    pub fn spawn(self, interval: Duration) -> ConsumerHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let thread = thread::spawn(move || {
            info!(interval_ms = interval.as_millis() as u64, "queue consumer started");
            while !flag.load(Ordering::SeqCst) {
                if let Err(e) = self.process_all() {
                    error!(error = %e, "queue consumer pass failed");
                }
                sleep_unless_stopped(&flag, interval);
            }
            info!("queue consumer stopped");
        });

        ConsumerHandle {
            shutdown,
            thread: Some(thread),
        }
    }
}

/// Running background consumer; stops on [`stop`](ConsumerHandle::stop) or drop
pub struct ConsumerHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ConsumerHandle {
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("queue consumer thread panicked");
            }
        }
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

fn sleep_unless_stopped(flag: &AtomicBool, interval: Duration) {
    let step = Duration::from_millis(50);
    let mut waited = Duration::ZERO;
    while waited < interval && !flag.load(Ordering::SeqCst) {
        let nap = step.min(interval - waited);
        thread::sleep(nap);
        waited += nap;
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{EntityKind, IndexOwner};
    use crate::pipeline::queue::MemoryQueueStore;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        applied: Mutex<Vec<(OperationKind, String)>>,
        fail_on: Option<String>,
    }

    impl IndexApplier for Recorder {
        fn apply(&self, op: &QueuedOperation, _doc: Option<IndexedDocument>) -> Result<()> {
            if self.fail_on.as_deref() == Some(op.docid.as_str()) {
                return Err(SearchError::write_failure("note_x", "disk full"));
            }
            self.applied.lock().push((op.kind, op.docid.clone()));
            Ok(())
        }
    }

    fn op(kind: OperationKind, docid: &str) -> Vec<u8> {
        let owner = IndexOwner::new("alice", EntityKind::User);
        QueuedOperation::new(kind, docid, &owner, ContentType::Note, 3600)
            .encode()
            .unwrap()
    }

    fn setup(fail_on: Option<&str>) -> (Arc<MemoryQueueStore>, Arc<Recorder>, QueueConsumer) {
        let store = Arc::new(MemoryQueueStore::new());
        let objects = Arc::new(MemoryObjects::new());
        for id in ["n1", "n2", "n3"] {
            objects.insert(IndexedDocument::new(id, ContentType::Note, "text"));
        }
        let recorder = Arc::new(Recorder {
            fail_on: fail_on.map(String::from),
            ..Default::default()
        });
        let consumer = QueueConsumer::new(store.clone(), objects, recorder.clone());
        (store, recorder, consumer)
    }

    #[test]
    fn test_applies_in_order() {
        let (store, recorder, consumer) = setup(None);
        store.push("alice", op(OperationKind::Add, "n1")).unwrap();
        store.push("alice", op(OperationKind::Update, "n1")).unwrap();
        store.push("alice", op(OperationKind::Delete, "n1")).unwrap();

        let stats = consumer.process_all().unwrap();
        assert_eq!(stats.applied, 3);
        assert_eq!(
            *recorder.applied.lock(),
            vec![
                (OperationKind::Add, "n1".to_string()),
                (OperationKind::Update, "n1".to_string()),
                (OperationKind::Delete, "n1".to_string()),
            ]
        );
        assert_eq!(store.len("alice").unwrap(), 0);
    }

    #[test]
    fn test_missing_object_skipped() {
        let (store, recorder, consumer) = setup(None);
        store.push("alice", op(OperationKind::Add, "gone")).unwrap();
        store.push("alice", op(OperationKind::Delete, "gone")).unwrap();

        let stats = consumer.process_queue("alice").unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.applied, 1);
        assert_eq!(recorder.applied.lock().len(), 1);
    }

    #[test]
    fn test_failure_requeues_remainder() {
        let (store, recorder, consumer) = setup(Some("n2"));
        let batch = vec![
            op(OperationKind::Add, "n1"),
            op(OperationKind::Add, "n2"),
            op(OperationKind::Add, "n3"),
        ];
        for m in &batch {
            store.push("alice", m.clone()).unwrap();
        }
        let later = op(OperationKind::Delete, "n1");
        store.push("alice", later.clone()).unwrap();

        let stats = consumer.process_queue("alice").unwrap();
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.requeued, 3);
        assert_eq!(recorder.applied.lock().len(), 1);
        assert_eq!(
            store.drain("alice").unwrap(),
            vec![batch[1].clone(), batch[2].clone(), later]
        );
    }

    /// Memory queues whose head cannot be rewritten
    #[derive(Default)]
    struct StuckHead {
        inner: MemoryQueueStore,
    }

    impl QueueStore for StuckHead {
        fn push(&self, queue: &str, message: Vec<u8>) -> Result<()> {
            self.inner.push(queue, message)
        }
        fn push_front(&self, _queue: &str, _messages: Vec<Vec<u8>>) -> Result<()> {
            Err(std::io::Error::other("queue volume is read-only").into())
        }
        fn drain(&self, queue: &str) -> Result<Vec<Vec<u8>>> {
            self.inner.drain(queue)
        }
        fn acknowledge(&self, queue: &str) -> Result<()> {
            self.inner.acknowledge(queue)
        }
        fn release(&self, queue: &str) {
            self.inner.release(queue)
        }
        fn len(&self, queue: &str) -> Result<usize> {
            self.inner.len(queue)
        }
        fn queues(&self) -> Result<Vec<String>> {
            self.inner.queues()
        }
    }

    #[test]
    fn test_failed_requeue_keeps_batch() {
        let store = Arc::new(StuckHead::default());
        let objects = Arc::new(MemoryObjects::new());
        for id in ["n1", "n2", "n3"] {
            objects.insert(IndexedDocument::new(id, ContentType::Note, "text"));
        }
        let recorder = Arc::new(Recorder {
            fail_on: Some("n2".to_string()),
            ..Default::default()
        });
        let consumer = QueueConsumer::new(store.clone(), objects, recorder.clone());

        let batch = vec![
            op(OperationKind::Add, "n1"),
            op(OperationKind::Add, "n2"),
            op(OperationKind::Add, "n3"),
        ];
        for m in &batch {
            store.push("alice", m.clone()).unwrap();
        }

        let err = consumer.process_queue("alice").unwrap_err();
        assert!(matches!(err, SearchError::Io(_)), "{err:?}");
        assert_eq!(recorder.applied.lock().len(), 1);
        // nothing lost: the whole batch comes back, applied prefix included
        assert_eq!(store.drain("alice").unwrap(), batch);
    }

    #[test]
    fn test_garbage_and_expired_dropped() {
        let (store, _, consumer) = setup(None);
        store.push("alice", b"junk".to_vec()).unwrap();
        let owner = IndexOwner::new("alice", EntityKind::User);
        let mut stale = QueuedOperation::new(OperationKind::Add, "n1", &owner, ContentType::Note, 0);
        stale.expires_at = 1;
        store.push("alice", stale.encode().unwrap()).unwrap();

        let stats = consumer.process_queue("alice").unwrap();
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.applied, 0);
        assert_eq!(store.len("alice").unwrap(), 0);
    }

    #[test]
    fn test_directory_resolver() {
        let tmp = tempfile::TempDir::new().unwrap();
        let doc = IndexedDocument::new("n1", ContentType::Note, "fire and ice");
        fs::write(tmp.path().join("n1.json"), serde_json::to_vec(&doc).unwrap()).unwrap();

        let resolver = DirectoryResolver::new(tmp.path());
        assert_eq!(resolver.resolve("n1", ContentType::Note).unwrap(), Some(doc));
        assert_eq!(resolver.resolve("n2", ContentType::Note).unwrap(), None);
    }

    #[test]
    fn test_background_thread_drains() {
        let (store, recorder, consumer) = setup(None);
        store.push("alice", op(OperationKind::Add, "n1")).unwrap();

        let handle = consumer.spawn(Duration::from_millis(10));
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while recorder.applied.lock().is_empty() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        handle.stop();
        assert_eq!(recorder.applied.lock().len(), 1);
    }
}
