//! Per-type field schemas.
//!
//! A schema decides which document fields are searchable and how each one
//! is analyzed. The whole document is stored alongside, so fields never need
//! a separate "stored" flag.

use serde::{Deserialize, Serialize};

use crate::utils::DEFAULT_MIN_TOKEN_LENGTH;

pub const FIELD_OID: &str = "oid";
pub const FIELD_NTIID: &str = "ntiid";
pub const FIELD_CONTAINER: &str = "containerId";
pub const FIELD_CREATOR: &str = "creator";
pub const FIELD_CONTENT: &str = "content";
pub const FIELD_QUICK: &str = "quick";
pub const FIELD_KEYWORDS: &str = "keywords";
pub const FIELD_TAGS: &str = "tags";
pub const FIELD_SHARED_WITH: &str = "sharedWith";
pub const FIELD_LAST_MODIFIED: &str = "lastModified";
pub const FIELD_CREATED_TIME: &str = "createdTime";

/// How a field's value is turned into index terms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Whole value is one exact term
    Id,
    /// Analyzed words with positions (phrase capable)
    Text,
    /// Word-start n-grams of the content
    NGram,
    /// Comma/whitespace separated, lowercased
    Keyword,
    /// Numeric or video timestamp; filtered on, never tokenized
    Timestamp,
}

impl FieldKind {
    /// Fields that contribute terms to the segment dictionary
    pub fn is_indexed(self) -> bool {
        !matches!(self, FieldKind::Timestamp)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub unique: bool,
}

impl FieldDef {
    fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            unique: false,
        }
    }

    fn unique(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Id,
            unique: true,
        }
    }
}

/// Field layout of one index, persisted in its manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub stop_words: Vec<String>,
    #[serde(default = "default_ngram_min")]
    pub ngram_min: usize,
    #[serde(default = "default_ngram_max")]
    pub ngram_max: usize,
}

fn default_ngram_min() -> usize {
    DEFAULT_MIN_TOKEN_LENGTH
}

fn default_ngram_max() -> usize {
    20
}

impl Schema {
    fn with_fields(fields: Vec<FieldDef>) -> Self {
        Self {
            fields,
            stop_words: Vec::new(),
            ngram_min: default_ngram_min(),
            ngram_max: default_ngram_max(),
        }
    }

    /// Same schema with different n-gram bounds
    pub fn with_ngrams(mut self, min: usize, max: usize) -> Self {
        self.ngram_min = min.max(1);
        self.ngram_max = max.max(self.ngram_min);
        self
    }

    /// Field id used in segment dictionaries
    pub fn field_id(&self, name: &str) -> Option<u16> {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .map(|i| i as u16)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// The field used for update and delete-by-term
    pub fn unique_field(&self) -> &str {
        self.fields
            .iter()
            .find(|f| f.unique)
            .map(|f| f.name.as_str())
            .unwrap_or(FIELD_OID)
    }

    /// Text fields used to build the suggest vocabulary
    pub fn vocabulary_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::Text | FieldKind::Keyword))
    }

    pub fn timestamp_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.kind == FieldKind::Timestamp)
    }
}

fn base_fields() -> Vec<FieldDef> {
    vec![
        FieldDef::unique(FIELD_OID),
        FieldDef::new(FIELD_NTIID, FieldKind::Id),
        FieldDef::new(FIELD_LAST_MODIFIED, FieldKind::Timestamp),
        FieldDef::new(FIELD_CONTENT, FieldKind::Text),
        FieldDef::new(FIELD_QUICK, FieldKind::NGram),
    ]
}

/// Book section: id, ntiid, title, keywords, related sections, text
pub fn book_schema() -> Schema {
    let mut fields = base_fields();
    fields.extend([
        FieldDef::new("title", FieldKind::Text),
        FieldDef::new(FIELD_KEYWORDS, FieldKind::Keyword),
        FieldDef::new("related", FieldKind::Keyword),
    ]);
    Schema::with_fields(fields)
}

/// Transcript cue: video location, video id, text, start/end timestamps
pub fn video_transcript_schema() -> Schema {
    let mut fields = base_fields();
    fields.extend([
        FieldDef::new(FIELD_CONTAINER, FieldKind::Id),
        FieldDef::new("videoId", FieldKind::Id),
        FieldDef::new("startTimestamp", FieldKind::Timestamp),
        FieldDef::new("endTimestamp", FieldKind::Timestamp),
    ]);
    Schema::with_fields(fields)
}

pub fn nticard_schema() -> Schema {
    let mut fields = base_fields();
    fields.extend([
        FieldDef::new(FIELD_CONTAINER, FieldKind::Id),
        FieldDef::new("title", FieldKind::Text),
        FieldDef::new("href", FieldKind::Id),
        FieldDef::new("targetNtiid", FieldKind::Id),
    ]);
    Schema::with_fields(fields)
}

fn user_fields() -> Vec<FieldDef> {
    let mut fields = base_fields();
    fields.extend([
        FieldDef::new(FIELD_CONTAINER, FieldKind::Id),
        FieldDef::new(FIELD_CREATOR, FieldKind::Id),
        FieldDef::new(FIELD_CREATED_TIME, FieldKind::Timestamp),
        FieldDef::new(FIELD_SHARED_WITH, FieldKind::Keyword),
        FieldDef::new(FIELD_KEYWORDS, FieldKind::Keyword),
    ]);
    fields
}

pub fn highlight_schema() -> Schema {
    Schema::with_fields(user_fields())
}

pub fn note_schema() -> Schema {
    let mut fields = user_fields();
    fields.push(FieldDef::new("references", FieldKind::Keyword));
    Schema::with_fields(fields)
}

pub fn redaction_schema() -> Schema {
    let mut fields = user_fields();
    fields.extend([
        FieldDef::new("replacementContent", FieldKind::Text),
        FieldDef::new("redactionExplanation", FieldKind::Text),
    ]);
    Schema::with_fields(fields)
}

pub fn messageinfo_schema() -> Schema {
    let mut fields = user_fields();
    fields.extend([
        FieldDef::new("references", FieldKind::Keyword),
        FieldDef::new("channel", FieldKind::Keyword),
        FieldDef::new("recipients", FieldKind::Keyword),
    ]);
    Schema::with_fields(fields)
}

pub fn post_schema() -> Schema {
    let mut fields = user_fields();
    fields.extend([
        FieldDef::new("title", FieldKind::Text),
        FieldDef::new(FIELD_TAGS, FieldKind::Keyword),
    ]);
    Schema::with_fields(fields)
}

/// Parse a video timestamp (`hh:mm:ss.mmm` or `hh:mm:ss,mmm`) into seconds
pub fn parse_video_timestamp(value: &str) -> Option<f64> {
    let cleaned: String = value
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    let mut parts = cleaned.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next().map_or(Some(0.0), |m| m.parse().ok())?;
    let seconds: f64 = parts.next().map_or(Some(0.0), |s| s.parse().ok())?;
    if parts.next().is_some() || minutes >= 60.0 || seconds >= 60.0 {
        return None;
    }

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}
