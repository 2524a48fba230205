use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::results::SearchHit;
use crate::results::compare::{SortContext, sort_hits};
use crate::suggest::rank_words;

/// Results of one search, or of several merged index legs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub term: String,
    pub hits: Vec<SearchHit>,
    /// Matching documents before batching
    pub total_count: usize,
    /// Newest `lastModified` among the hits
    pub last_modified: f64,
    /// Hit count per container id
    pub container_counts: BTreeMap<String, usize>,
    /// Spelling suggestions for the term, best first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl SearchResults {
    pub fn empty(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            ..Self::default()
        }
    }

    /// Results of a single leg
    pub fn from_hits(term: impl Into<String>, hits: Vec<SearchHit>, total_count: usize) -> Self {
        let mut results = Self {
            term: term.into(),
            hits,
            total_count,
            ..Self::default()
        };
        results.recount();
        results
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Union two result sets.
    ///
    /// Hits are keyed by oid. A duplicate keeps the higher-scored copy and
    /// the first one on equal scores. Counts and the container histogram
    /// are recomputed from the unique hits, so merging is commutative and
    /// associative up to hit order; sort afterwards for a stable order.
    pub fn merge(mut self, other: SearchResults) -> SearchResults {
        if self.term.is_empty() {
            self.term = other.term;
        }

        let mut positions: BTreeMap<String, usize> = self
            .hits
            .iter()
            .enumerate()
            .map(|(i, h)| (h.oid.clone(), i))
            .collect();

        for hit in other.hits {
            match positions.get(&hit.oid) {
                Some(&i) => {
                    if hit.score > self.hits[i].score {
                        self.hits[i] = hit;
                    }
                }
                None => {
                    positions.insert(hit.oid.clone(), self.hits.len());
                    self.hits.push(hit);
                }
            }
        }

        self.total_count = self.total_count.max(other.total_count);
        self.last_modified = self.last_modified.max(other.last_modified);
        if !other.suggestions.is_empty() {
            let words: BTreeSet<String> = self
                .suggestions
                .drain(..)
                .chain(other.suggestions)
                .collect();
            self.suggestions = rank_words(&self.term, words);
        }
        self.recount();
        self
    }

    /// Merge any number of results
    pub fn merge_all(term: &str, results: impl IntoIterator<Item = SearchResults>) -> SearchResults {
        results
            .into_iter()
            .fold(SearchResults::empty(term), SearchResults::merge)
    }

    fn recount(&mut self) {
        self.total_count = self.total_count.max(self.hits.len());
        self.container_counts.clear();
        for hit in &self.hits {
            *self
                .container_counts
                .entry(hit.container_key().to_string())
                .or_insert(0) += 1;
            self.last_modified = self.last_modified.max(hit.last_modified);
        }
    }

    pub fn sort(&mut self, ctx: &SortContext<'_>) {
        sort_hits(&mut self.hits, ctx);
    }

    /// Keep at most `limit` hits
    pub fn truncate(&mut self, limit: Option<usize>) {
        if let Some(limit) = limit {
            self.hits.truncate(limit);
        }
    }

    /// Keep the page `[start, start + size)`; counts are left untouched
    pub fn batch(&mut self, start: Option<usize>, size: Option<usize>) {
        let start = start.unwrap_or(0).min(self.hits.len());
        self.hits.drain(..start);
        if let Some(size) = size {
            self.hits.truncate(size);
        }
    }
}

/// Ranked word suggestions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestResults {
    pub term: String,
    pub suggestions: Vec<String>,
}

impl SuggestResults {
    pub fn new(term: impl Into<String>, suggestions: Vec<String>) -> Self {
        Self {
            term: term.into(),
            suggestions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.suggestions.is_empty()
    }

    /// Union both lists and re-rank against the term
    pub fn merge(self, other: SuggestResults) -> SuggestResults {
        let term = if self.term.is_empty() { other.term } else { self.term };
        let words: BTreeSet<String> = self
            .suggestions
            .into_iter()
            .chain(other.suggestions)
            .collect();
        let suggestions = rank_words(&term, words);
        SuggestResults { term, suggestions }
    }
}
