use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::schema::{
    FIELD_CONTAINER, FIELD_CONTENT, FIELD_CREATED_TIME, FIELD_CREATOR, FIELD_KEYWORDS,
    FIELD_LAST_MODIFIED, FIELD_NTIID, FIELD_OID, FIELD_QUICK, FIELD_SHARED_WITH, FIELD_TAGS,
    Schema, parse_video_timestamp,
};
use super::ContentType;

/// The searchable fields of one content instance.
///
/// This is what gets stored in a segment; source objects are never kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedDocument {
    pub oid: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    #[serde(default)]
    pub ntiid: String,
    #[serde(default)]
    pub container_id: String,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub shared_with: Vec<String>,
    #[serde(default)]
    pub last_modified: f64,
    #[serde(default)]
    pub created_time: f64,
    /// Type-specific fields (title, videoId, channel, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl IndexedDocument {
    pub fn new(oid: impl Into<String>, content_type: ContentType, content: impl Into<String>) -> Self {
        Self {
            oid: oid.into(),
            content_type,
            ntiid: String::new(),
            container_id: String::new(),
            creator: String::new(),
            content: content.into(),
            keywords: Vec::new(),
            tags: Vec::new(),
            shared_with: Vec::new(),
            last_modified: 0.0,
            created_time: 0.0,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_container(mut self, container_id: impl Into<String>) -> Self {
        self.container_id = container_id.into();
        self
    }

    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = creator.into();
        self
    }

    pub fn with_ntiid(mut self, ntiid: impl Into<String>) -> Self {
        self.ntiid = ntiid.into();
        self
    }

    pub fn with_last_modified(mut self, last_modified: f64) -> Self {
        self.last_modified = last_modified;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Raw values for a schema field, before analysis
    pub fn field_values(&self, name: &str) -> Vec<&str> {
        match name {
            FIELD_OID => single(&self.oid),
            FIELD_NTIID => single(&self.ntiid),
            FIELD_CONTAINER => single(&self.container_id),
            FIELD_CREATOR => single(&self.creator),
            FIELD_CONTENT | FIELD_QUICK => single(&self.content),
            FIELD_KEYWORDS => self.keywords.iter().map(String::as_str).collect(),
            FIELD_TAGS => self.tags.iter().map(String::as_str).collect(),
            FIELD_SHARED_WITH => self.shared_with.iter().map(String::as_str).collect(),
            other => self
                .extra
                .get(other)
                .map(|v| single(v))
                .unwrap_or_default(),
        }
    }

    /// Numeric value of a timestamp field, in seconds
    pub fn timestamp(&self, name: &str) -> Option<f64> {
        match name {
            FIELD_LAST_MODIFIED => Some(self.last_modified),
            FIELD_CREATED_TIME => Some(self.created_time),
            other => self.extra.get(other).and_then(|v| v.parse().ok()),
        }
    }

    /// Canonicalize values the schema cares about before indexing.
    ///
    /// Video timestamps are rewritten from `hh:mm:ss.mmm` to seconds.
    /// Values that do not parse are dropped.
    pub fn normalize(&mut self, schema: &Schema) {
        for field in schema.timestamp_fields() {
            let Some(raw) = self.extra.get(&field.name) else {
                continue;
            };
            if raw.parse::<f64>().is_ok() {
                continue;
            }
            match parse_video_timestamp(raw) {
                Some(secs) => {
                    self.extra.insert(field.name.clone(), secs.to_string());
                }
                None => {
                    self.extra.remove(&field.name);
                }
            }
        }
    }
}

fn single(s: &str) -> Vec<&str> {
    if s.is_empty() { Vec::new() } else { vec![s] }
}

/// Adapter from a domain object to its searchable fields.
///
/// Implementors only provide the accessors that apply to their type;
/// the rest default to empty.
pub trait ContentResolver {
    fn oid(&self) -> String;
    fn content_type(&self) -> ContentType;
    fn content(&self) -> String;

    fn ntiid(&self) -> String {
        String::new()
    }

    fn container_id(&self) -> String {
        String::new()
    }

    fn creator(&self) -> String {
        String::new()
    }

    fn keywords(&self) -> Vec<String> {
        Vec::new()
    }

    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    fn shared_with(&self) -> Vec<String> {
        Vec::new()
    }

    fn last_modified(&self) -> f64 {
        0.0
    }

    fn created_time(&self) -> f64 {
        0.0
    }

    fn extra(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn to_document(&self) -> IndexedDocument {
        IndexedDocument {
            oid: self.oid(),
            content_type: self.content_type(),
            ntiid: self.ntiid(),
            container_id: self.container_id(),
            creator: self.creator(),
            content: self.content(),
            keywords: self.keywords(),
            tags: self.tags(),
            shared_with: self.shared_with(),
            last_modified: self.last_modified(),
            created_time: self.created_time(),
            extra: self.extra(),
        }
    }
}

impl ContentResolver for IndexedDocument {
    fn oid(&self) -> String {
        self.oid.clone()
    }

    fn content_type(&self) -> ContentType {
        self.content_type
    }

    fn content(&self) -> String {
        self.content.clone()
    }

    fn to_document(&self) -> IndexedDocument {
        self.clone()
    }
}
