use lru::LruCache;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::error::Result;
use crate::index::{IndexHandle, IndexReader};

/// An open reader plus lazily built per-snapshot data
pub struct CachedReader {
    reader: IndexReader,
    vocabulary: OnceLock<Vec<String>>,
}

impl CachedReader {
    fn new(reader: IndexReader) -> Self {
        Self {
            reader,
            vocabulary: OnceLock::new(),
        }
    }

    pub fn reader(&self) -> &IndexReader {
        &self.reader
    }

    pub fn generation(&self) -> u64 {
        self.reader.generation()
    }

    /// Sorted suggest vocabulary of this snapshot
    pub fn vocabulary(&self) -> &[String] {
        self.vocabulary.get_or_init(|| {
            let words: BTreeSet<String> = self.reader.vocabulary();
            words.into_iter().collect()
        })
    }
}

/// Bounded LRU of open index snapshots, keyed by index name.
///
/// An entry is reused only while its generation matches the index
/// manifest, so commits from any process are picked up on the next access.
pub struct ReaderCache {
    entries: Mutex<LruCache<String, Arc<CachedReader>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ReaderCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Current snapshot of an index, opening it when missing or stale
    pub fn get(&self, handle: &IndexHandle) -> Result<Arc<CachedReader>> {
        let generation = handle.load_meta()?.generation;

        if let Some(cached) = self.entries.lock().get(&handle.name) {
            if cached.generation() == generation {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(cached));
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let reader = Arc::new(CachedReader::new(IndexReader::open(handle)?));
        debug!(index = %handle.name, generation = reader.generation(), "opened reader");

        let mut entries = self.entries.lock();
        // a concurrent open may have cached a newer snapshot
        match entries.get(&handle.name) {
            Some(existing) if existing.generation() >= reader.generation() => Ok(Arc::clone(existing)),
            _ => {
                entries.put(handle.name.clone(), Arc::clone(&reader));
                Ok(reader)
            }
        }
    }

    pub fn invalidate(&self, name: &str) {
        self.entries.lock().pop(name);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (hits, misses) since creation
    pub fn counters(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}
