use rayon::prelude::*;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use tracing::debug;

use crate::content::{IndexedDocument, Schema};
use crate::error::{Result, SearchError};
use crate::index::segment::SegmentReader;
use crate::index::storage::IndexHandle;
use crate::index::types::*;

/// Attempts to open a consistent snapshot when a merge races the open
const OPEN_ATTEMPTS: usize = 3;

/// Read-only snapshot of an index at one manifest generation
pub struct IndexReader {
    name: String,
    meta: IndexMeta,
    segments: Vec<SegmentReader>,
}

impl IndexReader {
    /// Open the current generation, loading segments in parallel
    pub fn open(handle: &IndexHandle) -> Result<Self> {
        let mut last_err = None;

        for attempt in 1..=OPEN_ATTEMPTS {
            let meta = handle.load_meta()?;
            let loaded: Result<Vec<SegmentReader>> = meta
                .segments
                .par_iter()
                .map(|seg| SegmentReader::open(&handle.dir, seg))
                .collect();

            match loaded {
                Ok(segments) => {
                    return Ok(Self {
                        name: handle.name.clone(),
                        meta,
                        segments,
                    });
                }
                // A commit replaced the manifest and removed files between reads
                Err(SearchError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                    debug!(index = %handle.name, attempt, "segment vanished during open, retrying");
                    last_err = Some(SearchError::Io(e));
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| SearchError::IndexMissing(handle.name.clone())))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn schema(&self) -> &Schema {
        &self.meta.schema
    }

    pub fn generation(&self) -> u64 {
        self.meta.generation
    }

    pub fn segments(&self) -> &[SegmentReader] {
        &self.segments
    }

    /// Live documents across all segments
    pub fn doc_count(&self) -> u64 {
        self.segments.iter().map(|s| s.live_count() as u64).sum()
    }

    pub fn field_id(&self, name: &str) -> Option<u16> {
        self.meta.schema.field_id(name)
    }

    /// Number of documents containing a term, summed over segments
    pub fn doc_freq(&self, field: u16, term: &str) -> u64 {
        self.segments
            .iter()
            .filter_map(|s| s.term(field, term))
            .map(|e| e.doc_freq as u64)
            .sum()
    }

    /// Distinct terms of the text and keyword fields
    pub fn vocabulary(&self) -> BTreeSet<String> {
        let fields: Vec<u16> = self
            .meta
            .schema
            .vocabulary_fields()
            .filter_map(|f| self.field_id(&f.name))
            .collect();

        let mut words = BTreeSet::new();
        for segment in &self.segments {
            for &field in &fields {
                words.extend(segment.field_terms(field).map(|(t, _)| t.to_string()));
            }
        }
        words
    }

    /// Live documents holding `term` in `field`
    pub fn find_by_term(&self, field: &str, term: &str) -> Result<Vec<IndexedDocument>> {
        let Some(field_id) = self.field_id(field) else {
            return Ok(Vec::new());
        };

        let mut docs = Vec::new();
        for segment in &self.segments {
            for posting in segment.postings(field_id, term)? {
                if !segment.is_deleted(posting.doc) {
                    docs.push(segment.document(posting.doc)?);
                }
            }
        }
        Ok(docs)
    }

    /// Every live document, segment by segment
    pub fn documents(&self) -> Result<Vec<IndexedDocument>> {
        let mut docs = Vec::with_capacity(self.doc_count() as usize);
        for segment in &self.segments {
            for doc in segment.live_docs() {
                docs.push(segment.document(doc)?);
            }
        }
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ContentType, EntityKind, IndexOwner};
    use crate::index::storage::IndexStorage;
    use tempfile::TempDir;

    #[test]
    fn test_reader_snapshot() {
        let tmp = TempDir::new().unwrap();
        let storage = IndexStorage::new(tmp.path());
        let owner = IndexOwner::new("alice", EntityKind::User);
        let handle = storage.open_or_create(&owner, ContentType::Note).unwrap();

        let mut writer = storage.writer(&handle).unwrap();
        writer.add_document(IndexedDocument::new("n1", ContentType::Note, "fire and ice"));
        writer.add_document(IndexedDocument::new("n2", ContentType::Note, "fire"));
        writer.commit().unwrap();

        let reader = IndexReader::open(&handle).unwrap();
        assert_eq!(reader.generation(), 1);
        assert_eq!(reader.doc_count(), 2);

        let content = reader.field_id("content").unwrap();
        assert_eq!(reader.doc_freq(content, "fire"), 2);
        assert_eq!(reader.find_by_term("oid", "n2").unwrap().len(), 1);

        let vocab = reader.vocabulary();
        assert!(vocab.contains("fire") && vocab.contains("and"));
        assert!(!vocab.contains("fi"));

        // new commits are invisible to an open snapshot
        let mut writer = storage.writer(&handle).unwrap();
        writer.delete_by_term("oid", "n2");
        writer.commit().unwrap();
        assert_eq!(reader.doc_count(), 2);
        assert_eq!(IndexReader::open(&handle).unwrap().doc_count(), 1);
    }

    #[test]
    fn test_empty_index() {
        let tmp = TempDir::new().unwrap();
        let storage = IndexStorage::new(tmp.path());
        let owner = IndexOwner::new("bob", EntityKind::User);
        let handle = storage.open_or_create(&owner, ContentType::Post).unwrap();

        let reader = IndexReader::open(&handle).unwrap();
        assert_eq!(reader.doc_count(), 0);
        assert!(reader.documents().unwrap().is_empty());
    }
}
