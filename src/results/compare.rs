//! Hit ordering.
//!
//! Every sort order is a chain of comparators, each falling back to the
//! next on ties, and the chain always ends on the hit oid so the final order
//! is total and independent of the order legs were merged in.

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::query::{SearchQuery, SortOn};
use crate::results::SearchHit;

/// Path-locality scores for relevance sorting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceWeights {
    /// Candidate at exactly the reference location
    pub same_location: i64,
    /// Candidate below the reference location
    pub below_location: i64,
    /// Per shared path element
    pub per_level: i64,
    /// Per element the candidate diverges below the common ancestor
    pub divergence_penalty: i64,
}

impl Default for RelevanceWeights {
    fn default() -> Self {
        Self {
            same_location: 10_000,
            below_location: 9_000,
            per_level: 20,
            divergence_penalty: 1,
        }
    }
}

impl RelevanceWeights {
    /// Score a candidate path against the reference path
    pub fn score_path(&self, reference: &[String], candidate: &[String]) -> i64 {
        if reference.is_empty() || candidate.is_empty() {
            return 0;
        }

        let common = reference
            .iter()
            .zip(candidate)
            .take_while(|(a, b)| a == b)
            .count() as i64;
        let (ref_len, cand_len) = (reference.len() as i64, candidate.len() as i64);

        let score = if common == 0 {
            0
        } else if common == ref_len {
            if ref_len == cand_len {
                self.same_location
            } else {
                self.below_location
            }
        } else if common == cand_len {
            // candidate is an ancestor of the reference
            self.per_level * common
        } else {
            self.per_level * common - self.divergence_penalty * (cand_len - common)
        };
        score.max(0)
    }
}

/// Resolves a content location to its path from the library root
pub trait ContainerPaths: Send + Sync {
    /// Ancestors first, ending with `ntiid` itself
    fn path(&self, ntiid: &str) -> Vec<String>;
}

/// No hierarchy: every location is its own one-element path
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatPaths;

impl ContainerPaths for FlatPaths {
    fn path(&self, ntiid: &str) -> Vec<String> {
        vec![ntiid.to_string()]
    }
}

/// Hierarchy from explicit parent links
#[derive(Debug, Clone, Default)]
pub struct StaticPaths {
    parents: AHashMap<String, String>,
}

impl StaticPaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, child: impl Into<String>, parent: impl Into<String>) {
        self.parents.insert(child.into(), parent.into());
    }

    /// Register a whole lineage, root first
    pub fn with_lineage(mut self, lineage: &[&str]) -> Self {
        for pair in lineage.windows(2) {
            self.insert(pair[1], pair[0]);
        }
        self
    }
}

impl ContainerPaths for StaticPaths {
    fn path(&self, ntiid: &str) -> Vec<String> {
        let mut path = vec![ntiid.to_string()];
        let mut seen = AHashSet::new();
        seen.insert(ntiid);

        let mut current = ntiid;
        while let Some(parent) = self.parents.get(current) {
            if !seen.insert(parent.as_str()) {
                break;
            }
            path.push(parent.clone());
            current = parent.as_str();
        }
        path.reverse();
        path
    }
}

/// Inputs to the comparator chain for one request
pub struct SortContext<'a> {
    pub sort_on: SortOn,
    pub descending: bool,
    pub reference: Vec<String>,
    paths: &'a dyn ContainerPaths,
    weights: &'a RelevanceWeights,
}

impl<'a> SortContext<'a> {
    pub fn new(query: &SearchQuery, paths: &'a dyn ContainerPaths, weights: &'a RelevanceWeights) -> Self {
        let reference = query
            .location
            .as_deref()
            .map(|loc| paths.path(loc))
            .unwrap_or_default();
        Self {
            sort_on: query.effective_sort(),
            descending: query.sort_descending.unwrap_or(true),
            reference,
            paths,
            weights,
        }
    }

    fn path_score(&self, hit: &SearchHit) -> i64 {
        hit.location()
            .map(|loc| self.weights.score_path(&self.reference, &self.paths.path(loc)))
            .unwrap_or(0)
    }
}

pub fn compare_score(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score.total_cmp(&a.score)
}

pub fn compare_last_modified(a: &SearchHit, b: &SearchHit, descending: bool) -> Ordering {
    let order = a.last_modified.total_cmp(&b.last_modified);
    if descending { order.reverse() } else { order }
}

pub fn compare_creator(a: &SearchHit, b: &SearchHit) -> Ordering {
    let creator = |h: &SearchHit| h.creator.as_deref().unwrap_or_default().to_lowercase();
    creator(a).cmp(&creator(b))
}

pub fn compare_type(a: &SearchHit, b: &SearchHit) -> Ordering {
    a.content_type
        .sort_priority()
        .cmp(&b.content_type.sort_priority())
}

fn compare_chain(a: &SearchHit, b: &SearchHit, ctx: &SortContext<'_>, path_scores: Option<(i64, i64)>) -> Ordering {
    let order = match ctx.sort_on {
        SortOn::Score => compare_score(a, b),
        SortOn::LastModified => {
            compare_last_modified(a, b, ctx.descending).then_with(|| compare_score(a, b))
        }
        SortOn::Creator => compare_creator(a, b).then_with(|| compare_score(a, b)),
        SortOn::Type => compare_type(a, b)
            .then_with(|| compare_last_modified(a, b, ctx.descending))
            .then_with(|| compare_score(a, b)),
        SortOn::Relevance => {
            let (pa, pb) = path_scores.unwrap_or((0, 0));
            pb.cmp(&pa)
                .then_with(|| compare_type(a, b))
                .then_with(|| compare_score(a, b))
        }
    };
    order.then_with(|| a.oid.cmp(&b.oid))
}

/// Sort hits in place for the request's effective order
pub fn sort_hits(hits: &mut Vec<SearchHit>, ctx: &SortContext<'_>) {
    if ctx.sort_on != SortOn::Relevance {
        hits.sort_by(|a, b| compare_chain(a, b, ctx, None));
        return;
    }

    let mut scored: Vec<(i64, SearchHit)> = hits
        .drain(..)
        .map(|hit| (ctx.path_score(&hit), hit))
        .collect();
    scored.sort_by(|(pa, a), (pb, b)| compare_chain(a, b, ctx, Some((*pa, *pb))));
    hits.extend(scored.into_iter().map(|(_, hit)| hit));
}
