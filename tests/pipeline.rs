//! Queued indexing against file-backed queues.

use parking_lot::Mutex;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use fedsearch::content::{ContentType, EntityKind, IndexOwner, IndexedDocument};
use fedsearch::engine::SearchEngine;
use fedsearch::error::{Result, SearchError};
use fedsearch::pipeline::{
    DirectoryResolver, FileQueueStore, IndexApplier, MemoryObjects, OBJECTS_DIR, OperationQueue,
    QUEUES_DIR, QueueConsumer, QueueStore, QueuedOperation,
};
use fedsearch::query::SearchQuery;
use fedsearch::utils::AppConfig;

fn alice() -> IndexOwner {
    IndexOwner::new("alice", EntityKind::User)
}

/// Records applied docids and fails on one of them
struct FlakyApplier {
    applied: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
}

impl FlakyApplier {
    fn failing_on(docid: &str) -> Self {
        Self {
            applied: Mutex::new(Vec::new()),
            fail_on: Mutex::new(Some(docid.to_string())),
        }
    }

    fn heal(&self) {
        *self.fail_on.lock() = None;
    }

    fn applied(&self) -> Vec<String> {
        self.applied.lock().clone()
    }
}

impl IndexApplier for FlakyApplier {
    fn apply(&self, op: &QueuedOperation, _doc: Option<IndexedDocument>) -> Result<()> {
        if self.fail_on.lock().as_deref() == Some(op.docid.as_str()) {
            return Err(SearchError::write_failure(&op.entity, format!("cannot write {}", op.docid)));
        }
        self.applied.lock().push(op.docid.clone());
        Ok(())
    }
}

fn objects(ids: &[&str]) -> Arc<MemoryObjects> {
    let objects = MemoryObjects::new();
    for id in ids {
        objects.insert(IndexedDocument::new(*id, ContentType::Note, "text"));
    }
    Arc::new(objects)
}

#[test]
fn failed_batch_is_requeued_in_order_on_disk() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(FileQueueStore::open(tmp.path()).unwrap());
    let queue = OperationQueue::new(store.clone(), 3600);
    for id in ["a", "b", "c", "d"] {
        queue.enqueue_add(&alice(), ContentType::Note, id).unwrap();
    }

    let applier = Arc::new(FlakyApplier::failing_on("c"));
    let consumer = QueueConsumer::new(store.clone(), objects(&["a", "b", "c", "d"]), applier.clone());

    let stats = consumer.process_all().unwrap();
    assert_eq!(stats.applied, 2);
    assert_eq!(stats.requeued, 2);
    assert_eq!(applier.applied(), vec!["a", "b"]);
    assert_eq!(queue.pending("alice").unwrap(), 2);

    // a fresh store over the same directory sees the requeued remainder
    let reopened = FileQueueStore::open(tmp.path()).unwrap();
    let left: Vec<String> = reopened
        .drain("alice")
        .unwrap()
        .iter()
        .map(|raw| QueuedOperation::decode(raw).unwrap().docid)
        .collect();
    assert_eq!(left, vec!["c", "d"]);
}

#[test]
fn requeued_operations_apply_after_recovery() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(FileQueueStore::open(tmp.path()).unwrap());
    let queue = OperationQueue::new(store.clone(), 3600);
    for id in ["a", "b", "c"] {
        queue.enqueue_update(&alice(), ContentType::Note, id).unwrap();
    }

    let applier = Arc::new(FlakyApplier::failing_on("b"));
    let consumer = QueueConsumer::new(store.clone(), objects(&["a", "b", "c"]), applier.clone());
    consumer.process_all().unwrap();

    // new work queued while the remainder waits goes behind it
    queue.enqueue_delete(&alice(), ContentType::Note, "a").unwrap();
    applier.heal();

    let stats = consumer.process_all().unwrap();
    assert_eq!(stats.applied, 3);
    assert_eq!(applier.applied(), vec!["a", "b", "c", "a"]);
    assert_eq!(queue.pending("alice").unwrap(), 0);
}

#[test]
fn drained_batch_survives_consumer_crash() {
    let tmp = TempDir::new().unwrap();
    {
        let store = Arc::new(FileQueueStore::open(tmp.path()).unwrap());
        let queue = OperationQueue::new(store.clone(), 3600);
        queue.enqueue_add(&alice(), ContentType::Note, "a").unwrap();
        queue.enqueue_add(&alice(), ContentType::Note, "b").unwrap();
        // taken by a consumer that died before applying anything
        assert_eq!(store.drain("alice").unwrap().len(), 2);
    }

    let store = Arc::new(FileQueueStore::open(tmp.path()).unwrap());
    let applier = Arc::new(FlakyApplier::failing_on("none"));
    let consumer = QueueConsumer::new(store.clone(), objects(&["a", "b"]), applier.clone());

    let stats = consumer.process_all().unwrap();
    assert_eq!(stats.applied, 2);
    assert_eq!(applier.applied(), vec!["a", "b"]);
    // acknowledged batches leave nothing behind
    assert!(store.queues().unwrap().is_empty());
    assert!(consumer.process_all().unwrap().is_empty());
}

#[test]
fn queues_survive_restart() {
    let tmp = TempDir::new().unwrap();
    {
        let store = Arc::new(FileQueueStore::open(tmp.path()).unwrap());
        let queue = OperationQueue::new(store, 3600);
        queue.enqueue_add(&alice(), ContentType::Note, "a").unwrap();
        queue
            .enqueue_add(&IndexOwner::new("bob", EntityKind::User), ContentType::Note, "b")
            .unwrap();
    }

    let store = FileQueueStore::open(tmp.path()).unwrap();
    let mut queues = store.queues().unwrap();
    queues.sort();
    assert_eq!(queues, vec!["alice", "bob"]);
    assert_eq!(store.len("alice").unwrap(), 1);
}

#[test]
fn drain_from_object_directory_into_engine() {
    let tmp = TempDir::new().unwrap();
    let config = AppConfig::with_data_dir(tmp.path());
    let engine = Arc::new(SearchEngine::new(tmp.path(), config).unwrap());

    let objects_dir = tmp.path().join(OBJECTS_DIR);
    fs::create_dir_all(&objects_dir).unwrap();
    let doc = IndexedDocument::new("n1", ContentType::Note, "Become my Shield");
    fs::write(objects_dir.join("n1.json"), serde_json::to_vec(&doc).unwrap()).unwrap();

    let store = Arc::new(FileQueueStore::open(tmp.path().join(QUEUES_DIR)).unwrap());
    let queue = OperationQueue::new(store.clone(), 3600);
    queue.enqueue_add(&alice(), ContentType::Note, "n1").unwrap();
    queue.enqueue_add(&alice(), ContentType::Note, "gone").unwrap();

    let applier: Arc<dyn IndexApplier> = engine.clone();
    let consumer = QueueConsumer::new(store, Arc::new(DirectoryResolver::new(&objects_dir)), applier);
    let handle = consumer.spawn(Duration::from_millis(20));

    let query = SearchQuery::new("shield").with_username("alice");
    let mut found = false;
    for _ in 0..100 {
        if engine.search(&query).len() == 1 {
            found = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    handle.stop();

    assert!(found, "queued add never reached the index");
    assert_eq!(queue.pending("alice").unwrap(), 0);
}
