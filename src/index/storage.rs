//! Named physical indices and their on-disk layout.
//!
//! ```text
//! <root>/indices/0xAB/0xCD/<name>/
//!     meta.json        manifest (commit point)
//!     write.lock       writer lock
//!     seg_NNNNNN.seg   immutable segments
//!     seg_NNNNNN_G.del deletion bitmaps
//! ```
//!
//! `AB` and `CD` are the first two bytes of SHA-256 of the index name.

use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::content::{ContentType, IndexOwner, Schema};
use crate::error::{Result, SearchError};
use crate::index::lock::{LockPolicy, WriterLock};
use crate::index::types::{IndexMeta, MergePolicy, META_FILE};
use crate::index::writer::IndexWriter;
use crate::utils::AppConfig;

const INDICES_DIR: &str = "indices";

/// Lowercase hex of a digest prefix
fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Deterministic index name for an (entity, content type) pair
pub fn index_name(entity: &str, content_type: ContentType) -> String {
    let digest = Sha256::digest(format!("{}:{}", entity, content_type.name()).as_bytes());
    let full = hex(&digest);
    format!("{}{}", content_type.handler().index_prefix, &full[..32])
}

/// A named index and where it lives
#[derive(Debug, Clone)]
pub struct IndexHandle {
    pub name: String,
    pub owner: IndexOwner,
    pub content_type: ContentType,
    pub schema: Schema,
    pub dir: PathBuf,
}

impl IndexHandle {
    fn from_meta(meta: &IndexMeta, dir: PathBuf) -> Self {
        Self {
            name: meta.name.clone(),
            owner: meta.owner.clone(),
            content_type: meta.content_type,
            schema: meta.schema.clone(),
            dir,
        }
    }

    /// Read the current manifest
    pub fn load_meta(&self) -> Result<IndexMeta> {
        read_meta(&self.dir)
    }
}

/// Creates, opens and locks indices under one data root
#[derive(Debug, Clone)]
pub struct IndexStorage {
    root: PathBuf,
    lock_policy: LockPolicy,
    merge_policy: MergePolicy,
    ngram_bounds: (usize, usize),
}

impl IndexStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock_policy: LockPolicy::default(),
            merge_policy: MergePolicy::default(),
            ngram_bounds: (2, 20),
        }
    }

    /// Storage rooted at `root` with limits taken from the config
    pub fn with_config(root: impl Into<PathBuf>, config: &AppConfig) -> Self {
        Self {
            root: root.into(),
            lock_policy: LockPolicy::new(
                config.lock_max_attempts,
                config.lock_min_delay_ms,
                config.lock_max_delay_ms,
            ),
            merge_policy: MergePolicy::new(config.max_segments, config.merge_segments),
            ngram_bounds: (config.ngram_min, config.ngram_max),
        }
    }

    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.merge_policy
    }

    /// Directory of a named index, whether or not it exists
    pub fn index_dir(&self, name: &str) -> PathBuf {
        let digest = Sha256::digest(name.as_bytes());
        self.root
            .join(INDICES_DIR)
            .join(format!("0x{:02x}", digest[0]))
            .join(format!("0x{:02x}", digest[1]))
            .join(name)
    }

    pub fn index_exists(&self, name: &str) -> bool {
        self.index_dir(name).join(META_FILE).is_file()
    }

    /// Create a new, empty index
    pub fn create_index(
        &self,
        name: &str,
        owner: IndexOwner,
        content_type: ContentType,
        schema: Schema,
    ) -> Result<IndexHandle> {
        let dir = self.index_dir(name);
        if dir.join(META_FILE).is_file() {
            return Err(SearchError::IndexExists(name.to_string()));
        }
        fs::create_dir_all(&dir)?;

        // Creators serialize on the writer lock; only the first publishes a manifest
        let _lock = WriterLock::acquire(&dir, name, &self.lock_policy)?;
        if dir.join(META_FILE).is_file() {
            return Err(SearchError::IndexExists(name.to_string()));
        }
        let meta = IndexMeta::new(name, owner, content_type, schema);
        write_meta_atomic(&dir, &meta)?;
        info!(index = name, content_type = %content_type, "created index");

        Ok(IndexHandle::from_meta(&meta, dir))
    }

    /// Open an existing index
    pub fn open_index(&self, name: &str) -> Result<IndexHandle> {
        let dir = self.index_dir(name);
        if !dir.join(META_FILE).is_file() {
            return Err(SearchError::IndexMissing(name.to_string()));
        }
        let meta = read_meta(&dir)?;
        Ok(IndexHandle::from_meta(&meta, dir))
    }

    /// Open the index of an (entity, content type) pair, creating it on first write
    pub fn open_or_create(&self, owner: &IndexOwner, content_type: ContentType) -> Result<IndexHandle> {
        let name = index_name(&owner.entity, content_type);
        match self.open_index(&name) {
            Ok(handle) => Ok(handle),
            Err(SearchError::IndexMissing(_)) => {
                let (min, max) = self.ngram_bounds;
                let schema = content_type.handler().schema().with_ngrams(min, max);
                match self.create_index(&name, owner.clone(), content_type, schema) {
                    // Lost a creation race; the other creator's manifest wins
                    Err(SearchError::IndexExists(_)) => self.open_index(&name),
                    other => other,
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Acquire the exclusive writer of an index
    pub fn writer(&self, handle: &IndexHandle) -> Result<IndexWriter> {
        let lock = WriterLock::acquire(&handle.dir, &handle.name, &self.lock_policy)?;
        IndexWriter::new(handle.clone(), lock, self.merge_policy)
    }

    /// Manifests of every index under the root, sorted by name
    pub fn list_indices(&self) -> Result<Vec<IndexMeta>> {
        let base = self.root.join(INDICES_DIR);
        let mut metas = Vec::new();
        if !base.is_dir() {
            return Ok(metas);
        }

        for level1 in fs::read_dir(&base)? {
            let level1 = level1?.path();
            if !level1.is_dir() {
                continue;
            }
            for level2 in fs::read_dir(&level1)? {
                let level2 = level2?.path();
                if !level2.is_dir() {
                    continue;
                }
                for index_dir in fs::read_dir(&level2)? {
                    let index_dir = index_dir?.path();
                    if index_dir.join(META_FILE).is_file() {
                        match read_meta(&index_dir) {
                            Ok(meta) => metas.push(meta),
                            Err(e) => debug!(dir = %index_dir.display(), error = %e, "skipping unreadable index"),
                        }
                    }
                }
            }
        }

        metas.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(metas)
    }

    /// Delete an index and all its files
    pub fn remove_index(&self, name: &str) -> Result<bool> {
        let dir = self.index_dir(name);
        if !dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&dir)?;
        info!(index = name, "removed index");
        Ok(true)
    }
}

/// Read meta.json from an index directory
pub fn read_meta(dir: &Path) -> Result<IndexMeta> {
    let path = dir.join(META_FILE);
    let file = File::open(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SearchError::IndexMissing(dir.display().to_string())
        } else {
            SearchError::Io(e)
        }
    })?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .map_err(|e| SearchError::corrupt(path.display().to_string(), e.to_string()))
}

/// Replace meta.json atomically (write temp file, fsync, rename)
pub fn write_meta_atomic(dir: &Path, meta: &IndexMeta) -> Result<()> {
    let seq = META_TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp = dir.join(format!("{}.{}.{}.tmp", META_FILE, std::process::id(), seq));
    let written = (|| -> Result<()> {
        let file = File::create(&tmp)?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, meta)?;
        out.flush()?;
        out.get_ref().sync_all()?;
        fs::rename(&tmp, dir.join(META_FILE))?;
        Ok(())
    })();
    if written.is_err()
        && let Err(e) = fs::remove_file(&tmp)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %tmp.display(), error = %e, "failed to remove temporary manifest");
    }
    written
}

/// Distinguishes temporary manifests of concurrent writers in one process
static META_TMP_SEQ: AtomicU64 = AtomicU64::new(0);
