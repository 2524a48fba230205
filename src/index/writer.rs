use roaring::RoaringBitmap;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use crate::content::{FieldKind, IndexedDocument};
use crate::error::{Result, SearchError};
use crate::index::lock::WriterLock;
use crate::index::segment::{SegmentBuilder, SegmentReader, remove_if_exists, write_deletions};
use crate::index::storage::{IndexHandle, read_meta, write_meta_atomic};
use crate::index::types::*;

/// Summary of one commit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitStats {
    pub generation: u64,
    pub added: usize,
    pub deleted: usize,
    /// Number of segments folded into a merged segment
    pub merged: usize,
    pub segments: usize,
}

/// Exclusive writer for one index.
///
/// Changes are buffered until [`commit`](IndexWriter::commit). Dropping the
/// writer or calling [`cancel`](IndexWriter::cancel) discards them.
pub struct IndexWriter {
    handle: IndexHandle,
    _lock: WriterLock,
    merge_policy: MergePolicy,
    pending: Vec<IndexedDocument>,
    /// (field, term) pairs to delete from committed segments
    deletes: Vec<(String, String)>,
    finished: bool,
}

impl IndexWriter {
    pub(crate) fn new(handle: IndexHandle, lock: WriterLock, merge_policy: MergePolicy) -> Result<Self> {
        Ok(Self {
            handle,
            _lock: lock,
            merge_policy,
            pending: Vec::new(),
            deletes: Vec::new(),
            finished: false,
        })
    }

    pub fn index_name(&self) -> &str {
        &self.handle.name
    }

    /// Buffer a document for the next commit
    pub fn add_document(&mut self, mut doc: IndexedDocument) {
        doc.normalize(&self.handle.schema);
        self.pending.push(doc);
    }

    /// Delete every document whose field holds exactly `term`.
    ///
    /// Buffered documents are dropped immediately; committed ones on commit.
    pub fn delete_by_term(&mut self, field: &str, term: &str) {
        self.pending
            .retain(|doc| !doc.field_values(field).iter().any(|v| *v == term));
        self.deletes.push((field.to_string(), term.to_string()));
    }

    /// Replace the document sharing this document's unique key
    pub fn update_document(&mut self, doc: IndexedDocument) {
        let unique = self.handle.schema.unique_field().to_string();
        self.delete_by_term(&unique, &doc.oid);
        self.add_document(doc);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn has_changes(&self) -> bool {
        !self.pending.is_empty() || !self.deletes.is_empty()
    }

    /// Discard all buffered changes and release the lock
    pub fn cancel(mut self) {
        self.discard("cancelled");
    }

    fn discard(&mut self, why: &str) {
        if !self.finished && self.has_changes() {
            debug!(
                index = %self.handle.name,
                docs = self.pending.len(),
                deletes = self.deletes.len(),
                reason = why,
                "discarding uncommitted changes"
            );
        }
        self.pending.clear();
        self.deletes.clear();
        self.finished = true;
    }

    /// Commit with the storage's merge policy
    pub fn commit(self) -> Result<CommitStats> {
        let policy = self.merge_policy;
        self.commit_with(policy)
    }

    /// Merge every segment into one while committing
    pub fn optimize(self) -> Result<CommitStats> {
        self.commit_with(MergePolicy::optimize())
    }

    /// Apply deletions, write a new segment, merge, then swap the manifest
    pub fn commit_with(mut self, policy: MergePolicy) -> Result<CommitStats> {
        let mut created: Vec<PathBuf> = Vec::new();
        let result = self.apply(policy, &mut created);
        self.finished = true;

        match result {
            Ok((stats, obsolete)) => {
                for path in obsolete {
                    if let Err(e) = remove_if_exists(&path) {
                        debug!(path = %path.display(), error = %e, "could not remove obsolete file");
                    }
                }
                Ok(stats)
            }
            Err(e) => {
                for path in &created {
                    if let Err(cleanup) = remove_if_exists(path) {
                        warn!(
                            path = %path.display(),
                            error = %cleanup,
                            "could not remove file of failed commit"
                        );
                    }
                }
                error!(index = %self.handle.name, error = %e, "commit failed, changes discarded");
                self.pending.clear();
                self.deletes.clear();
                Err(match e {
                    SearchError::WriteFailure { .. } => e,
                    other => SearchError::write_failure(&self.handle.name, other),
                })
            }
        }
    }

    fn apply(
        &mut self,
        policy: MergePolicy,
        created: &mut Vec<PathBuf>,
    ) -> Result<(CommitStats, Vec<PathBuf>)> {
        let dir = self.handle.dir.clone();
        let mut meta = read_meta(&dir)?;
        let schema = meta.schema.clone();
        let mut obsolete = Vec::new();
        let mut stats = CommitStats::default();

        let merge_ids = policy.select(&meta.segments);
        if !self.has_changes() && merge_ids.is_empty() {
            stats.generation = meta.generation;
            stats.segments = meta.segments.len();
            return Ok((stats, obsolete));
        }

        // 1. deletions against committed segments
        if !self.deletes.is_empty() {
            let mut keep = Vec::with_capacity(meta.segments.len());
            for mut seg in std::mem::take(&mut meta.segments) {
                let reader = SegmentReader::open(&dir, &seg)?;
                let mut deleted: RoaringBitmap = reader.deletions().clone();
                let before = deleted.len();

                for (field, term) in &self.deletes {
                    let Some(field_id) = schema.field_id(field) else {
                        continue;
                    };
                    if schema.fields[field_id as usize].kind == FieldKind::Timestamp {
                        continue;
                    }
                    for posting in reader.postings(field_id, term)? {
                        deleted.insert(posting.doc);
                    }
                }

                let newly = (deleted.len() - before) as usize;
                if newly == 0 {
                    keep.push(seg);
                    continue;
                }
                stats.deleted += newly;

                if let Some(old) = seg.del_file_name() {
                    obsolete.push(dir.join(old));
                }
                if deleted.len() >= seg.doc_count as u64 {
                    obsolete.push(dir.join(seg.file_name()));
                    continue;
                }

                seg.del_gen += 1;
                seg.deleted = deleted.len() as u32;
                if let Some(name) = seg.del_file_name() {
                    let path = dir.join(name);
                    created.push(path.clone());
                    write_deletions(&path, &deleted)?;
                }
                keep.push(seg);
            }
            meta.segments = keep;
        }

        // 2. new segment from buffered documents
        if !self.pending.is_empty() {
            let mut builder = SegmentBuilder::new(&schema);
            for doc in &self.pending {
                builder.add(doc)?;
            }
            let seg = SegmentMeta::new(meta.next_segment, builder.doc_count() as u32);
            meta.next_segment += 1;
            let path = dir.join(seg.file_name());
            created.push(path.clone());
            builder.write(&path)?;
            stats.added = seg.doc_count as usize;
            meta.segments.push(seg);
        }

        // 3. bounded merge
        let merge_ids: HashSet<SegmentId> = policy.select(&meta.segments).into_iter().collect();
        if !merge_ids.is_empty() {
            let mut builder = SegmentBuilder::new(&schema);
            for seg in meta.segments.iter().filter(|s| merge_ids.contains(&s.id)) {
                let reader = SegmentReader::open(&dir, seg)?;
                for doc in reader.live_docs() {
                    builder.add(&reader.document(doc)?)?;
                }
                obsolete.push(dir.join(seg.file_name()));
                if let Some(del) = seg.del_file_name() {
                    obsolete.push(dir.join(del));
                }
            }

            meta.segments.retain(|s| !merge_ids.contains(&s.id));
            if !builder.is_empty() {
                let merged = SegmentMeta::new(meta.next_segment, builder.doc_count() as u32);
                meta.next_segment += 1;
                let path = dir.join(merged.file_name());
                created.push(path.clone());
                builder.write(&path)?;
                meta.segments.push(merged);
            }
            stats.merged = merge_ids.len();
        }

        // 4. commit point
        meta.generation += 1;
        meta.updated_at = unix_now();
        write_meta_atomic(&dir, &meta)?;

        stats.generation = meta.generation;
        stats.segments = meta.segments.len();
        info!(
            index = %self.handle.name,
            generation = stats.generation,
            added = stats.added,
            deleted = stats.deleted,
            merged = stats.merged,
            segments = stats.segments,
            "committed"
        );

        self.pending.clear();
        self.deletes.clear();
        Ok((stats, obsolete))
    }
}

impl Drop for IndexWriter {
    fn drop(&mut self) {
        self.discard("dropped without commit");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentType, EntityKind, IndexOwner};
    use crate::index::storage::IndexStorage;
    use tempfile::TempDir;

    fn setup(tmp: &TempDir, policy: MergePolicy) -> (IndexStorage, IndexHandle) {
        let storage = IndexStorage::new(tmp.path()).with_merge_policy(policy);
        let owner = IndexOwner::new("alice", EntityKind::User);
        let handle = storage.open_or_create(&owner, ContentType::Note).unwrap();
        (storage, handle)
    }

    fn note(oid: &str, text: &str) -> IndexedDocument {
        IndexedDocument::new(oid, ContentType::Note, text)
    }

    #[test]
    fn test_commit_writes_segment() {
        let tmp = TempDir::new().unwrap();
        let (storage, handle) = setup(&tmp, MergePolicy::default());

        let mut writer = storage.writer(&handle).unwrap();
        writer.add_document(note("n1", "hello"));
        writer.add_document(note("n2", "world"));
        let stats = writer.commit().unwrap();

        assert_eq!(stats.generation, 1);
        assert_eq!(stats.added, 2);
        let meta = handle.load_meta().unwrap();
        assert_eq!(meta.segments.len(), 1);
        assert_eq!(meta.live_docs(), 2);
    }

    #[test]
    fn test_cancel_and_drop_discard() {
        let tmp = TempDir::new().unwrap();
        let (storage, handle) = setup(&tmp, MergePolicy::default());

        let mut writer = storage.writer(&handle).unwrap();
        writer.add_document(note("n1", "hello"));
        writer.cancel();

        {
            let mut writer = storage.writer(&handle).unwrap();
            writer.add_document(note("n2", "hello"));
        }

        let meta = handle.load_meta().unwrap();
        assert_eq!(meta.generation, 0);
        assert!(meta.segments.is_empty());
    }

    #[test]
    fn test_delete_and_update() {
        let tmp = TempDir::new().unwrap();
        let (storage, handle) = setup(&tmp, MergePolicy::default());

        let mut writer = storage.writer(&handle).unwrap();
        writer.add_document(note("n1", "one"));
        writer.add_document(note("n2", "two"));
        writer.commit().unwrap();

        let mut writer = storage.writer(&handle).unwrap();
        writer.update_document(note("n1", "uno"));
        writer.delete_by_term("oid", "n2");
        let stats = writer.commit().unwrap();
        assert_eq!(stats.deleted, 2);

        let meta = handle.load_meta().unwrap();
        assert_eq!(meta.live_docs(), 1);
        // first segment fully deleted and dropped
        assert_eq!(meta.segments.len(), 1);
    }

    #[test]
    fn test_delete_buffered_document() {
        let tmp = TempDir::new().unwrap();
        let (storage, handle) = setup(&tmp, MergePolicy::default());

        let mut writer = storage.writer(&handle).unwrap();
        writer.add_document(note("n1", "one"));
        writer.delete_by_term("oid", "n1");
        assert_eq!(writer.pending_count(), 0);
        writer.commit().unwrap();
        assert_eq!(handle.load_meta().unwrap().live_docs(), 0);
    }

    #[test]
    fn test_failed_commit_removes_its_files() {
        let tmp = TempDir::new().unwrap();
        let (storage, handle) = setup(&tmp, MergePolicy::new(1, 2));

        let mut writer = storage.writer(&handle).unwrap();
        writer.add_document(note("n1", "one"));
        writer.commit().unwrap();

        // the merged segment's path is taken by a directory nobody can remove_file
        let blocked = handle.dir.join(segment_file_name(3));
        std::fs::create_dir(&blocked).unwrap();

        let mut writer = storage.writer(&handle).unwrap();
        writer.add_document(note("n2", "two"));
        let err = writer.commit().unwrap_err();
        assert!(matches!(err, SearchError::WriteFailure { .. }), "{err:?}");

        // the new segment was cleaned up, the blocker survives, the manifest is untouched
        assert!(!handle.dir.join(segment_file_name(2)).exists());
        assert!(blocked.is_dir());
        let meta = handle.load_meta().unwrap();
        assert_eq!(meta.generation, 1);
        assert_eq!(meta.live_docs(), 1);

        std::fs::remove_dir(&blocked).unwrap();
        let mut writer = storage.writer(&handle).unwrap();
        writer.add_document(note("n2", "two"));
        writer.commit().unwrap();
        assert_eq!(handle.load_meta().unwrap().live_docs(), 2);
    }

    #[test]
    fn test_bounded_merge() {
        let tmp = TempDir::new().unwrap();
        let (storage, handle) = setup(&tmp, MergePolicy::new(3, 2));

        for i in 0..4 {
            let mut writer = storage.writer(&handle).unwrap();
            writer.add_document(note(&format!("n{i}"), "text"));
            writer.commit().unwrap();
        }

        let meta = handle.load_meta().unwrap();
        assert!(meta.segments.len() <= 3);
        assert_eq!(meta.live_docs(), 4);
    }

    #[test]
    fn test_optimize_single_segment() {
        let tmp = TempDir::new().unwrap();
        let (storage, handle) = setup(&tmp, MergePolicy::new(100, 5));

        for i in 0..3 {
            let mut writer = storage.writer(&handle).unwrap();
            writer.add_document(note(&format!("n{i}"), "text"));
            writer.commit().unwrap();
        }
        let stats = storage.writer(&handle).unwrap().optimize().unwrap();
        assert_eq!(stats.merged, 3);
        assert_eq!(stats.segments, 1);

        let files: Vec<_> = std::fs::read_dir(&handle.dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "seg"))
            .collect();
        assert_eq!(files.len(), 1);
    }
}
