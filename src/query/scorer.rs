//! TF-IDF scoring.
//!
//! Each matched term contributes `sqrt(DTW * QTW)` where
//!
//! - `idf = ln(N / (df + 1)) + 1` over the live documents of one index
//! - `DTW = (1 + ln tf) * idf` is the document term weight
//! - `QTW = (0.5 + 0.5 * qtf / max_qtf) * idf` is the query term weight
//!
//! Scores are only comparable within one index; merged results from
//! several indices are ordered by these values anyway.

use rustc_hash::FxHashMap;

use crate::query::parser::QueryNode;

/// Inverse document frequency; positive whenever `df <= n`
#[inline]
pub fn idf(n: u64, df: u64) -> f32 {
    let n = n.max(1) as f32;
    (n / (df as f32 + 1.0)).ln() + 1.0
}

/// Document term weight
#[inline]
pub fn document_weight(tf: u32, idf: f32) -> f32 {
    if tf == 0 {
        return 0.0;
    }
    (1.0 + (tf as f32).ln()) * idf
}

/// Query term weight
#[inline]
pub fn query_weight(qtf: u32, max_qtf: u32, idf: f32) -> f32 {
    let ratio = qtf as f32 / max_qtf.max(1) as f32;
    (0.5 + 0.5 * ratio) * idf
}

/// Per-query scoring state for one index
#[derive(Debug, Clone)]
pub struct Scorer {
    doc_count: u64,
    query_tf: FxHashMap<(String, String), u32>,
    max_qtf: u32,
}

impl Scorer {
    /// Count query term frequencies from the positive leaves of the tree
    pub fn new(root: &QueryNode, doc_count: u64) -> Self {
        let mut query_tf: FxHashMap<(String, String), u32> = FxHashMap::default();
        for key in root.leaf_terms() {
            *query_tf.entry(key).or_insert(0) += 1;
        }
        let max_qtf = query_tf.values().copied().max().unwrap_or(1);

        Self {
            doc_count,
            query_tf,
            max_qtf,
        }
    }

    pub fn doc_count(&self) -> u64 {
        self.doc_count
    }

    fn qtf(&self, field: &str, term: &str) -> u32 {
        self.query_tf
            .get(&(field.to_string(), term.to_string()))
            .copied()
            .unwrap_or(1)
    }

    /// Score contribution of a term occurring `tf` times in a document.
    /// `key` is the query leaf the term matched; for prefix expansions it
    /// is the prefix rather than the expanded term.
    pub fn score(&self, field: &str, key: &str, tf: u32, df: u64) -> f32 {
        let idf = idf(self.doc_count, df);
        let dtw = document_weight(tf, idf);
        let qtw = query_weight(self.qtf(field, key), self.max_qtf, idf);
        (dtw * qtw).sqrt()
    }

    /// Highest score a term can reach in a segment where its largest
    /// frequency is `max_tf`
    pub fn upper_bound(&self, field: &str, key: &str, max_tf: u32, df: u64) -> f32 {
        self.score(field, key, max_tf, df)
    }
}
