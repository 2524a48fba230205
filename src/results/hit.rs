use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::content::{ContentType, IndexedDocument};
use crate::highlight::{Fragment, Highlight};

/// One ranked result, built from a stored document and its highlight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub oid: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub score: f32,
    pub snippet: String,
    #[serde(default)]
    pub fragments: Vec<Fragment>,
    #[serde(default)]
    pub match_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ntiid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(default)]
    pub last_modified: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

impl SearchHit {
    pub fn new(doc: IndexedDocument, score: f32, highlight: Highlight) -> Self {
        Self {
            oid: doc.oid,
            content_type: doc.content_type,
            score,
            snippet: highlight.snippet,
            fragments: highlight.fragments,
            match_count: highlight.match_count,
            container_id: non_empty(doc.container_id),
            ntiid: non_empty(doc.ntiid),
            creator: non_empty(doc.creator),
            last_modified: doc.last_modified,
            extra: doc.extra,
        }
    }

    /// Location used for relevance sorting: the container, else the hit's own ntiid
    pub fn location(&self) -> Option<&str> {
        self.container_id.as_deref().or(self.ntiid.as_deref())
    }

    /// Container key for per-container counts
    pub fn container_key(&self) -> &str {
        self.container_id.as_deref().unwrap_or(UNSPECIFIED_CONTAINER)
    }
}

/// Count key for hits without a container
pub const UNSPECIFIED_CONTAINER: &str = "+++unspecified_container+++";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_document() {
        let doc = IndexedDocument::new("n1", ContentType::Note, "fire")
            .with_container("tag:book-1")
            .with_creator("alice")
            .with_last_modified(42.0);
        let hit = SearchHit::new(doc, 1.5, Highlight::default());

        assert_eq!(hit.container_id.as_deref(), Some("tag:book-1"));
        assert_eq!(hit.ntiid, None);
        assert_eq!(hit.location(), Some("tag:book-1"));
        assert_eq!(hit.last_modified, 42.0);

        let json = serde_json::to_value(&hit).unwrap();
        assert_eq!(json["type"], "note");
        assert_eq!(json["containerId"], "tag:book-1");
        assert!(json.get("ntiid").is_none());
    }

    #[test]
    fn test_container_key_default() {
        let hit = SearchHit::new(
            IndexedDocument::new("b1", ContentType::Book, "x"),
            1.0,
            Highlight::default(),
        );
        assert_eq!(hit.container_key(), UNSPECIFIED_CONTAINER);
    }
}
