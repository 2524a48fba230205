use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::content::{ContentType, IndexOwner, Schema};

/// Document number, local to one segment
pub type DocNum = u32;

/// Segment identifier, unique within one index
pub type SegmentId = u32;

/// On-disk format version written to meta.json and segment headers
pub const INDEX_FORMAT_VERSION: u32 = 1;

pub const META_FILE: &str = "meta.json";
pub const LOCK_FILE: &str = "write.lock";

/// One committed segment as recorded in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub id: SegmentId,
    pub doc_count: u32,
    /// Number of deleted documents in the current deletion generation
    #[serde(default)]
    pub deleted: u32,
    /// Deletion generation; 0 means no deletion file
    #[serde(default)]
    pub del_gen: u32,
}

impl SegmentMeta {
    pub fn new(id: SegmentId, doc_count: u32) -> Self {
        Self {
            id,
            doc_count,
            deleted: 0,
            del_gen: 0,
        }
    }

    pub fn live_count(&self) -> u32 {
        self.doc_count.saturating_sub(self.deleted)
    }

    pub fn file_name(&self) -> String {
        segment_file_name(self.id)
    }

    /// Deletion bitmap file for the current generation, if any
    pub fn del_file_name(&self) -> Option<String> {
        (self.del_gen > 0).then(|| deletion_file_name(self.id, self.del_gen))
    }
}

pub fn segment_file_name(id: SegmentId) -> String {
    format!("seg_{:06}.seg", id)
}

pub fn deletion_file_name(id: SegmentId, generation: u32) -> String {
    format!("seg_{:06}_{}.del", id, generation)
}

/// Index manifest stored in meta.json. Replacing this file is the commit point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    pub version: u32,
    pub name: String,
    pub owner: IndexOwner,
    pub content_type: ContentType,
    pub schema: Schema,
    /// Incremented on every commit
    pub generation: u64,
    pub next_segment: SegmentId,
    pub segments: Vec<SegmentMeta>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl IndexMeta {
    pub fn new(name: &str, owner: IndexOwner, content_type: ContentType, schema: Schema) -> Self {
        let now = unix_now();
        Self {
            version: INDEX_FORMAT_VERSION,
            name: name.to_string(),
            owner,
            content_type,
            schema,
            generation: 0,
            next_segment: 1,
            segments: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn live_docs(&self) -> u64 {
        self.segments.iter().map(|s| s.live_count() as u64).sum()
    }

    pub fn deleted_docs(&self) -> u64 {
        self.segments.iter().map(|s| s.deleted as u64).sum()
    }

    pub fn segment(&self, id: SegmentId) -> Option<&SegmentMeta> {
        self.segments.iter().find(|s| s.id == id)
    }
}

/// Bounded merge policy applied on commit.
///
/// When the segment count exceeds `max_segments`, the `merge_segments`
/// smallest segments (by live documents, oldest first on ties) are folded
/// into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePolicy {
    pub max_segments: usize,
    pub merge_segments: usize,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            max_segments: 10,
            merge_segments: 5,
        }
    }
}

impl MergePolicy {
    pub fn new(max_segments: usize, merge_segments: usize) -> Self {
        Self {
            max_segments: max_segments.max(1),
            merge_segments: merge_segments.max(2),
        }
    }

    /// Merge everything into a single segment
    pub fn optimize() -> Self {
        Self {
            max_segments: 1,
            merge_segments: usize::MAX,
        }
    }

    /// Segments to merge for the given manifest, in manifest order
    pub fn select(&self, segments: &[SegmentMeta]) -> Vec<SegmentId> {
        if segments.len() <= self.max_segments {
            return Vec::new();
        }

        let mut candidates: Vec<&SegmentMeta> = segments.iter().collect();
        candidates.sort_by_key(|s| (s.live_count(), s.id));

        let take = self.merge_segments.min(candidates.len());
        if take < 2 {
            return Vec::new();
        }

        let mut ids: Vec<SegmentId> = candidates[..take].iter().map(|s| s.id).collect();
        ids.sort_unstable();
        ids
    }
}

/// Dictionary entry mapping a (field, term) to its postings in a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DictEntry {
    pub doc_freq: u32,
    /// Highest term frequency of this term in any document of the segment
    pub max_tf: u32,
    pub offset: u64,
    pub length: u32,
}

/// A decoded posting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub doc: DocNum,
    pub tf: u32,
    /// Token positions; empty for fields without positions
    pub positions: Vec<u32>,
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(id: SegmentId, live: u32) -> SegmentMeta {
        SegmentMeta::new(id, live)
    }

    #[test]
    fn test_merge_policy_under_threshold() {
        let policy = MergePolicy::new(3, 2);
        let segments = vec![seg(1, 10), seg(2, 1), seg(3, 5)];
        assert!(policy.select(&segments).is_empty());
    }

    #[test]
    fn test_merge_policy_smallest_first_oldest_on_ties() {
        let policy = MergePolicy::new(3, 2);
        let segments = vec![seg(1, 10), seg(2, 4), seg(3, 4), seg(4, 9)];
        assert_eq!(policy.select(&segments), vec![2, 3]);
    }

    #[test]
    fn test_merge_policy_counts_live_docs() {
        let policy = MergePolicy::new(2, 2);
        let mut big = seg(1, 100);
        big.deleted = 99;
        let segments = vec![big, seg(2, 50), seg(3, 60)];
        assert_eq!(policy.select(&segments), vec![1, 2]);
    }

    #[test]
    fn test_optimize_takes_everything() {
        let segments = vec![seg(1, 10), seg(2, 4)];
        assert_eq!(MergePolicy::optimize().select(&segments), vec![1, 2]);
        assert!(MergePolicy::optimize().select(&segments[..1]).is_empty());
    }

    #[test]
    fn test_file_names() {
        let mut meta = seg(7, 3);
        assert_eq!(meta.file_name(), "seg_000007.seg");
        assert_eq!(meta.del_file_name(), None);
        meta.del_gen = 2;
        assert_eq!(meta.del_file_name().as_deref(), Some("seg_000007_2.del"));
    }
}
