use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::content::{ContentType, Family, IndexedDocument};

/// Result ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortOn {
    /// Container path proximity to the query location
    Relevance,
    Score,
    LastModified,
    Creator,
    Type,
}

impl FromStr for SortOn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "relevance" => Ok(SortOn::Relevance),
            "score" => Ok(SortOn::Score),
            "lastmodified" | "modified" | "date" => Ok(SortOn::LastModified),
            "creator" => Ok(SortOn::Creator),
            "type" => Ok(SortOn::Type),
            _ => Err(format!("unknown sort order '{}'", s)),
        }
    }
}

impl fmt::Display for SortOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SortOn::Relevance => "relevance",
            SortOn::Score => "score",
            SortOn::LastModified => "lastModified",
            SortOn::Creator => "creator",
            SortOn::Type => "type",
        };
        f.write_str(name)
    }
}

/// A search or suggest request.
///
/// Field names on the wire are camelCase. Everything except `term` is
/// optional; unset tuning values fall back to the engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchQuery {
    pub term: String,
    /// Content types to search; empty means all
    pub search_on: Vec<ContentType>,
    pub limit: Option<usize>,
    pub batch_start: Option<usize>,
    pub batch_size: Option<usize>,
    pub sort_on: Option<SortOn>,
    /// Direction for `lastModified` sorting (default newest first)
    pub sort_descending: Option<bool>,
    pub maxchars: Option<usize>,
    pub surround: Option<usize>,
    pub maxdist: Option<usize>,
    pub prefix: Option<usize>,
    pub created_after: Option<f64>,
    pub created_before: Option<f64>,
    pub modified_after: Option<f64>,
    pub modified_before: Option<f64>,
    /// Reference NTIID for relevance sorting
    pub location: Option<String>,
    pub username: Option<String>,
    /// Content package id
    pub indexid: Option<String>,
}

impl SearchQuery {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            ..Self::default()
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_package(mut self, indexid: impl Into<String>) -> Self {
        self.indexid = Some(indexid.into());
        self
    }

    pub fn with_search_on(mut self, types: impl IntoIterator<Item = ContentType>) -> Self {
        self.search_on = types.into_iter().collect();
        self
    }

    pub fn with_sort(mut self, sort_on: SortOn) -> Self {
        self.sort_on = Some(sort_on);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_batch(mut self, start: usize, size: usize) -> Self {
        self.batch_start = Some(start);
        self.batch_size = Some(size);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Same request for a different term
    pub fn retargeted(&self, term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            ..self.clone()
        }
    }

    /// Trim the term and drop meaningless values
    pub fn normalized(mut self) -> Self {
        self.term = self.term.trim().to_string();
        if self.batch_size == Some(0) {
            self.batch_size = None;
        }
        if self.limit == Some(0) {
            self.limit = None;
        }
        self.location = self.location.filter(|l| !l.trim().is_empty());
        self.username = self.username.filter(|u| !u.trim().is_empty());
        self.indexid = self.indexid.filter(|i| !i.trim().is_empty());
        self.search_on.sort();
        self.search_on.dedup();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.term.trim().is_empty()
    }

    /// The term holds a quoted substring
    pub fn is_phrase_search(&self) -> bool {
        let quotes = self.term.matches('"').count();
        quotes >= 2
    }

    /// The trimmed term ends with `*`
    pub fn is_prefix_search(&self) -> bool {
        !self.is_phrase_search() && self.term.trim_end().ends_with('*')
    }

    /// True if the term is a single word (no whitespace after trimming)
    pub fn is_single_word(&self) -> bool {
        !self.term.trim().contains(char::is_whitespace)
    }

    pub fn searches(&self, content_type: ContentType) -> bool {
        self.search_on.is_empty() || self.search_on.contains(&content_type)
    }

    /// Requested types of one family, in sort order
    pub fn types_of(&self, family: Family) -> Vec<ContentType> {
        ContentType::of_family(family)
            .filter(|t| self.searches(*t))
            .collect()
    }

    /// Relevance when a location is given, otherwise score
    pub fn effective_sort(&self) -> SortOn {
        match self.sort_on {
            Some(SortOn::Relevance) if self.location.is_none() => SortOn::Score,
            Some(sort) => sort,
            None if self.location.is_some() => SortOn::Relevance,
            None => SortOn::Score,
        }
    }

    pub fn has_date_filters(&self) -> bool {
        self.created_after.is_some()
            || self.created_before.is_some()
            || self.modified_after.is_some()
            || self.modified_before.is_some()
    }

    /// Check the date-range filters against a stored document.
    /// Bounds are inclusive.
    pub fn accepts(&self, doc: &IndexedDocument) -> bool {
        let within = |value: f64, after: Option<f64>, before: Option<f64>| {
            after.is_none_or(|a| value >= a) && before.is_none_or(|b| value <= b)
        };
        within(doc.created_time, self.created_after, self.created_before)
            && within(doc.last_modified, self.modified_after, self.modified_before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_flags() {
        assert!(SearchQuery::new("\"all waves\"").is_phrase_search());
        assert!(SearchQuery::new("rise \"all waves\" now").is_phrase_search());
        assert!(!SearchQuery::new("\"unclosed").is_phrase_search());
        assert!(SearchQuery::new("ra*").is_prefix_search());
        assert!(SearchQuery::new(" ra* ").is_prefix_search());
        assert!(!SearchQuery::new("ra").is_prefix_search());
    }

    #[test]
    fn test_effective_sort() {
        let q = SearchQuery::new("x");
        assert_eq!(q.effective_sort(), SortOn::Score);
        let q = q.with_location("tag:a");
        assert_eq!(q.effective_sort(), SortOn::Relevance);
        let q = SearchQuery::new("x").with_sort(SortOn::Relevance);
        assert_eq!(q.effective_sort(), SortOn::Score);
        let q = SearchQuery::new("x").with_sort(SortOn::Creator);
        assert_eq!(q.effective_sort(), SortOn::Creator);
    }

    #[test]
    fn test_wire_names() {
        let json = r#"{"term":"fire","searchOn":["note","book"],"batchStart":5,"sortOn":"lastModified","createdAfter":10.5}"#;
        let q: SearchQuery = serde_json::from_str(json).unwrap();
        assert_eq!(q.term, "fire");
        assert_eq!(q.search_on, vec![ContentType::Note, ContentType::Book]);
        assert_eq!(q.batch_start, Some(5));
        assert_eq!(q.sort_on, Some(SortOn::LastModified));
        assert_eq!(q.created_after, Some(10.5));
    }

    #[test]
    fn test_retargeted_keeps_everything_but_term() {
        let original = SearchQuery::new("rankl")
            .with_username("alice")
            .with_batch(5, 10);
        let other = original.retargeted("rankle");

        assert_eq!(other.term, "rankle");
        assert_eq!(original.term, "rankl");
        assert_eq!(other.username, original.username);
        assert_eq!(other.batch_start, Some(5));
        assert_eq!(other.batch_size, Some(10));
    }

    #[test]
    fn test_normalized() {
        let mut q = SearchQuery::new("  fire  ").with_batch(0, 0);
        q.search_on = vec![ContentType::Post, ContentType::Note, ContentType::Post];
        q.location = Some(" ".into());
        let q = q.normalized();
        assert_eq!(q.term, "fire");
        assert_eq!(q.batch_size, None);
        assert_eq!(q.search_on, vec![ContentType::Note, ContentType::Post]);
        assert!(q.location.is_none());
    }

    #[test]
    fn test_types_of_family() {
        let q = SearchQuery::new("x").with_search_on([ContentType::Note, ContentType::Book]);
        assert_eq!(q.types_of(Family::Package), vec![ContentType::Book]);
        assert_eq!(q.types_of(Family::User), vec![ContentType::Note]);
        assert_eq!(SearchQuery::new("x").types_of(Family::User).len(), 5);
    }

    #[test]
    fn test_date_filters() {
        let mut doc = IndexedDocument::new("1", ContentType::Note, "x");
        doc.created_time = 100.0;
        doc.last_modified = 200.0;

        let mut q = SearchQuery::new("x");
        assert!(q.accepts(&doc));
        q.created_after = Some(100.0);
        q.modified_before = Some(200.0);
        assert!(q.accepts(&doc));
        q.modified_after = Some(201.0);
        assert!(!q.accepts(&doc));
    }
}
