//! Asynchronous indexing.
//!
//! Writers enqueue compact operation messages on a per-entity queue and
//! return immediately. A [`QueueConsumer`] later drains each queue as a
//! whole, resolves the live objects and applies the operations to the
//! entity's index. Failed batches are put back, never dropped.

pub mod consumer;
pub mod message;
pub mod queue;

use std::sync::Arc;
use tracing::debug;

use crate::content::{ContentType, IndexOwner};
use crate::error::Result;

pub use consumer::{
    BatchStats, ConsumerHandle, DirectoryResolver, IndexApplier, MemoryObjects, ObjectResolver,
    QueueConsumer,
};
pub use message::{OperationKind, QueuedOperation};
pub use queue::{FileQueueStore, MemoryQueueStore, QueueStore};

/// Queue files, under the data directory
pub const QUEUES_DIR: &str = "queues";

/// `<oid>.json` source objects for the directory resolver, under the data directory
pub const OBJECTS_DIR: &str = "objects";

/// Producer side of the pipeline
#[derive(Clone)]
pub struct OperationQueue {
    store: Arc<dyn QueueStore>,
    expiry_secs: u64,
}

impl OperationQueue {
    pub fn new(store: Arc<dyn QueueStore>, expiry_secs: u64) -> Self {
        Self { store, expiry_secs }
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn enqueue_add(&self, owner: &IndexOwner, content_type: ContentType, docid: &str) -> Result<QueuedOperation> {
        self.enqueue(OperationKind::Add, owner, content_type, docid)
    }

    pub fn enqueue_update(&self, owner: &IndexOwner, content_type: ContentType, docid: &str) -> Result<QueuedOperation> {
        self.enqueue(OperationKind::Update, owner, content_type, docid)
    }

    pub fn enqueue_delete(&self, owner: &IndexOwner, content_type: ContentType, docid: &str) -> Result<QueuedOperation> {
        self.enqueue(OperationKind::Delete, owner, content_type, docid)
    }

    /// Queue an operation on the owning entity's queue
    pub fn enqueue(
        &self,
        kind: OperationKind,
        owner: &IndexOwner,
        content_type: ContentType,
        docid: &str,
    ) -> Result<QueuedOperation> {
        let op = QueuedOperation::new(kind, docid, owner, content_type, self.expiry_secs);
        self.store.push(&owner.entity, op.encode()?)?;
        debug!(queue = %owner.entity, docid, %kind, version = op.version, "enqueued operation");
        Ok(op)
    }

    /// Messages waiting for an entity
    pub fn pending(&self, entity: &str) -> Result<usize> {
        self.store.len(entity)
    }
}
