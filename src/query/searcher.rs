//! Query evaluation against one index snapshot.
//!
//! Segments are evaluated one at a time; each yields the live documents
//! matching the bound query tree with their TF-IDF scores. When the caller
//! wants the best `limit` documents by score, segments are visited in order
//! of their score upper bound and those that cannot beat the current top-k
//! threshold are only counted, never decoded.

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::content::IndexedDocument;
use crate::error::Result;
use crate::index::reader::IndexReader;
use crate::index::segment::SegmentReader;
use crate::index::types::DocNum;
use crate::query::parser::{ParsedQuery, QueryNode};
use crate::query::request::{SearchQuery, SortOn};
use crate::query::scorer::Scorer;
use crate::query::topk::{TopKEntry, TopKHeap};

/// A matching stored document
#[derive(Debug, Clone)]
pub struct RawHit {
    pub doc: IndexedDocument,
    pub score: f32,
    pub segment: usize,
    pub docnum: DocNum,
}

/// Hits of one index plus the number of documents that matched
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub hits: Vec<RawHit>,
    pub total: usize,
}

type Matches = FxHashMap<DocNum, f32>;

/// Evaluates parsed queries against an index snapshot
pub struct Searcher<'r> {
    reader: &'r IndexReader,
    scorer: Scorer,
}

impl<'r> Searcher<'r> {
    pub fn new(reader: &'r IndexReader, parsed: &ParsedQuery) -> Self {
        Self {
            reader,
            scorer: Scorer::new(&parsed.root, reader.doc_count()),
        }
    }

    /// Run the query. Hits come back by descending score.
    pub fn search(&self, parsed: &ParsedQuery, query: &SearchQuery) -> Result<SearchOutcome> {
        if parsed.root.is_empty() || self.reader.doc_count() == 0 {
            return Ok(SearchOutcome::default());
        }

        let outcome = match query.limit {
            Some(limit) if query.effective_sort() == SortOn::Score => {
                self.search_top_k(&parsed.root, query, limit)?
            }
            _ => self.search_all(&parsed.root, query)?,
        };

        trace!(
            index = %self.reader.name(),
            hits = outcome.hits.len(),
            total = outcome.total,
            "index searched"
        );
        Ok(outcome)
    }

    fn search_all(&self, root: &QueryNode, query: &SearchQuery) -> Result<SearchOutcome> {
        let mut outcome = SearchOutcome::default();

        for (seg_idx, segment) in self.reader.segments().iter().enumerate() {
            for (docnum, score) in sorted(self.eval(segment, root)?) {
                let doc = segment.document(docnum)?;
                if !query.accepts(&doc) {
                    continue;
                }
                outcome.hits.push(RawHit {
                    doc,
                    score,
                    segment: seg_idx,
                    docnum,
                });
            }
        }

        outcome.total = outcome.hits.len();
        outcome.hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| (a.segment, a.docnum).cmp(&(b.segment, b.docnum)))
        });
        Ok(outcome)
    }

    fn search_top_k(&self, root: &QueryNode, query: &SearchQuery, limit: usize) -> Result<SearchOutcome> {
        let segments = self.reader.segments();
        let mut order: Vec<(usize, f32)> = segments
            .iter()
            .enumerate()
            .filter_map(|(i, seg)| self.upper_bound(seg, root).map(|b| (i, b)))
            .collect();
        order.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut heap = TopKHeap::new(limit);
        let mut total = 0usize;
        let mut pruned = 0usize;

        for (seg_idx, bound) in order {
            let segment = &segments[seg_idx];
            let matches = self.eval(segment, root)?;
            let skip = heap.is_full() && bound <= heap.threshold();

            if skip {
                pruned += 1;
                total += if query.has_date_filters() {
                    self.count_accepted(segment, matches.keys().copied(), query)?
                } else {
                    matches.len()
                };
                continue;
            }

            for (docnum, score) in sorted(matches) {
                if query.has_date_filters() && !query.accepts(&segment.document(docnum)?) {
                    continue;
                }
                total += 1;
                heap.try_insert(TopKEntry {
                    score,
                    segment: seg_idx,
                    doc: docnum,
                });
            }
        }

        trace!(index = %self.reader.name(), pruned, "top-k segments pruned");

        let hits = heap
            .into_sorted_vec()
            .into_iter()
            .map(|e| {
                Ok(RawHit {
                    doc: segments[e.segment].document(e.doc)?,
                    score: e.score,
                    segment: e.segment,
                    docnum: e.doc,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(SearchOutcome { hits, total })
    }

    fn count_accepted(
        &self,
        segment: &SegmentReader,
        docs: impl Iterator<Item = DocNum>,
        query: &SearchQuery,
    ) -> Result<usize> {
        let mut count = 0;
        for doc in docs {
            if query.accepts(&segment.document(doc)?) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Highest score any document in the segment could reach, or None when
    /// the segment cannot match
    fn upper_bound(&self, segment: &SegmentReader, node: &QueryNode) -> Option<f32> {
        match node {
            QueryNode::Term { field, text } => {
                let field_id = self.reader.field_id(field)?;
                let entry = segment.term(field_id, text)?;
                let df = self.reader.doc_freq(field_id, text);
                Some(self.scorer.upper_bound(field, text, entry.max_tf, df))
            }
            QueryNode::Phrase { field, terms } => {
                let field_id = self.reader.field_id(field)?;
                let mut bound = 0.0;
                for term in terms {
                    let entry = segment.term(field_id, term)?;
                    let df = self.reader.doc_freq(field_id, term);
                    bound += self.scorer.upper_bound(field, term, entry.max_tf, df);
                }
                Some(bound)
            }
            QueryNode::Prefix { field, prefix } => {
                let field_id = self.reader.field_id(field)?;
                segment
                    .prefix_terms(field_id, prefix)
                    .map(|(term, entry)| {
                        let df = self.reader.doc_freq(field_id, term);
                        self.scorer.upper_bound(field, prefix, entry.max_tf, df)
                    })
                    .reduce(f32::max)
            }
            QueryNode::And(nodes) => {
                let mut bound = 0.0;
                let mut positives = 0;
                for node in nodes {
                    if matches!(node, QueryNode::Not(_)) {
                        continue;
                    }
                    bound += self.upper_bound(segment, node)?;
                    positives += 1;
                }
                (positives > 0).then_some(bound)
            }
            QueryNode::Or(nodes) => nodes
                .iter()
                .filter_map(|n| self.upper_bound(segment, n))
                .reduce(|a, b| a + b),
            QueryNode::Not(_) | QueryNode::Empty => None,
        }
    }

    /// Live matching documents of one segment with their scores
    fn eval(&self, segment: &SegmentReader, node: &QueryNode) -> Result<Matches> {
        match node {
            QueryNode::Term { field, text } => self.eval_term(segment, field, text),
            QueryNode::Phrase { field, terms } => self.eval_phrase(segment, field, terms),
            QueryNode::Prefix { field, prefix } => self.eval_prefix(segment, field, prefix),
            QueryNode::And(nodes) => {
                let (negatives, positives): (Vec<&QueryNode>, Vec<&QueryNode>) =
                    nodes.iter().partition(|n| matches!(n, QueryNode::Not(_)));
                if positives.is_empty() {
                    return Ok(Matches::default());
                }

                let mut acc = self.eval(segment, positives[0])?;
                for node in &positives[1..] {
                    if acc.is_empty() {
                        break;
                    }
                    let next = self.eval(segment, node)?;
                    acc.retain(|doc, _| next.contains_key(doc));
                    for (doc, score) in acc.iter_mut() {
                        *score += next[doc];
                    }
                }

                for node in negatives {
                    if let QueryNode::Not(inner) = node {
                        let excluded = self.eval(segment, inner)?;
                        acc.retain(|doc, _| !excluded.contains_key(doc));
                    }
                }
                Ok(acc)
            }
            QueryNode::Or(nodes) => {
                let mut acc = Matches::default();
                for node in nodes {
                    for (doc, score) in self.eval(segment, node)? {
                        *acc.entry(doc).or_insert(0.0) += score;
                    }
                }
                Ok(acc)
            }
            // A bare negation has nothing to subtract from
            QueryNode::Not(_) | QueryNode::Empty => Ok(Matches::default()),
        }
    }

    fn eval_term(&self, segment: &SegmentReader, field: &str, term: &str) -> Result<Matches> {
        let mut out = Matches::default();
        let Some(field_id) = self.reader.field_id(field) else {
            return Ok(out);
        };
        if segment.term(field_id, term).is_none() {
            return Ok(out);
        }

        let df = self.reader.doc_freq(field_id, term);
        for posting in segment.postings(field_id, term)? {
            if !segment.is_deleted(posting.doc) {
                out.insert(posting.doc, self.scorer.score(field, term, posting.tf, df));
            }
        }
        Ok(out)
    }

    fn eval_prefix(&self, segment: &SegmentReader, field: &str, prefix: &str) -> Result<Matches> {
        let mut out = Matches::default();
        let Some(field_id) = self.reader.field_id(field) else {
            return Ok(out);
        };

        let expansions: Vec<String> = segment
            .prefix_terms(field_id, prefix)
            .map(|(t, _)| t.to_string())
            .collect();

        for term in expansions {
            let df = self.reader.doc_freq(field_id, &term);
            for posting in segment.postings(field_id, &term)? {
                if segment.is_deleted(posting.doc) {
                    continue;
                }
                let score = self.scorer.score(field, prefix, posting.tf, df);
                let best = out.entry(posting.doc).or_insert(0.0);
                *best = best.max(score);
            }
        }
        Ok(out)
    }

    fn eval_phrase(&self, segment: &SegmentReader, field: &str, terms: &[String]) -> Result<Matches> {
        let mut out = Matches::default();
        let Some(field_id) = self.reader.field_id(field) else {
            return Ok(out);
        };
        if terms.iter().any(|t| segment.term(field_id, t).is_none()) {
            return Ok(out);
        }

        let mut lists = Vec::with_capacity(terms.len());
        for term in terms {
            let postings: FxHashMap<DocNum, Vec<u32>> = segment
                .postings(field_id, term)?
                .into_iter()
                .filter(|p| !segment.is_deleted(p.doc))
                .map(|p| (p.doc, p.positions))
                .collect();
            lists.push(postings);
        }

        let dfs: Vec<u64> = terms
            .iter()
            .map(|t| self.reader.doc_freq(field_id, t))
            .collect();

        for (&doc, first_positions) in &lists[0] {
            let mut occurrences = 0u32;
            'start: for &start in first_positions {
                for (offset, list) in lists.iter().enumerate().skip(1) {
                    let Some(positions) = list.get(&doc) else {
                        break 'start;
                    };
                    if positions.binary_search(&(start + offset as u32)).is_err() {
                        continue 'start;
                    }
                }
                occurrences += 1;
            }

            if occurrences > 0 {
                let score = terms
                    .iter()
                    .zip(&dfs)
                    .map(|(term, &df)| self.scorer.score(field, term, occurrences, df))
                    .sum();
                out.insert(doc, score);
            }
        }
        Ok(out)
    }
}

fn sorted(matches: Matches) -> Vec<(DocNum, f32)> {
    let mut matches: Vec<_> = matches.into_iter().collect();
    matches.sort_unstable_by_key(|(doc, _)| *doc);
    matches
}
