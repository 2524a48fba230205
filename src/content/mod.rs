//! Content types and their static registry.
//!
//! Every indexable kind of content is a [`ContentType`]. The registry maps
//! each one to a [`Handler`] that fixes its schema, index family, index-name
//! prefix and position in the type sort order. Adding a content type means
//! adding a variant and a registry row; nothing is discovered at runtime.
//!
//! ```
//! use fedsearch::content::{ContentType, Family};
//!
//! let handler = ContentType::Note.handler();
//! assert_eq!(handler.family, Family::User);
//! assert!(handler.schema().has_field("oid"));
//! ```

pub mod document;
pub mod schema;

pub use document::{ContentResolver, IndexedDocument};
pub use schema::{FieldDef, FieldKind, Schema};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of indexable content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Book,
    #[serde(rename = "videotranscript")]
    VideoTranscript,
    #[serde(rename = "nticard")]
    NtiCard,
    Note,
    Highlight,
    Redaction,
    #[serde(rename = "messageinfo")]
    MessageInfo,
    Post,
}

/// Who owns the indices of a content type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// Rendered content: one index per content package
    Package,
    /// User-generated content: one index per entity
    User,
}

/// Kind of entity an index belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Book,
    User,
    Community,
    #[serde(rename = "dynamicgroup")]
    DynamicGroup,
}

impl EntityKind {
    /// Usual owner kind of a content type's indices
    pub fn default_for(content_type: ContentType) -> Self {
        match content_type.family() {
            Family::Package => EntityKind::Book,
            Family::User => EntityKind::User,
        }
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "book" | "package" => Ok(EntityKind::Book),
            "user" => Ok(EntityKind::User),
            "community" => Ok(EntityKind::Community),
            "dynamicgroup" | "group" | "friendslist" => Ok(EntityKind::DynamicGroup),
            _ => Err(format!("unknown entity kind '{}'", s)),
        }
    }
}

/// Owner of a physical index
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexOwner {
    pub entity: String,
    pub kind: EntityKind,
}

impl IndexOwner {
    pub fn new(entity: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            entity: entity.into(),
            kind,
        }
    }
}

/// Compile-time description of a content type
pub struct Handler {
    pub content_type: ContentType,
    /// Wire name, as used in `searchOn` and queue messages
    pub name: &'static str,
    pub family: Family,
    /// Prefix of the physical index name
    pub index_prefix: &'static str,
    /// Position in the Type comparator (lower sorts first)
    pub sort_priority: u8,
    schema_fn: fn() -> Schema,
}

impl Handler {
    pub fn schema(&self) -> Schema {
        (self.schema_fn)()
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("family", &self.family)
            .field("sort_priority", &self.sort_priority)
            .finish()
    }
}

static REGISTRY: [Handler; 8] = [
    Handler {
        content_type: ContentType::Book,
        name: "book",
        family: Family::Package,
        index_prefix: "book_",
        sort_priority: 0,
        schema_fn: schema::book_schema,
    },
    Handler {
        content_type: ContentType::VideoTranscript,
        name: "videotranscript",
        family: Family::Package,
        index_prefix: "vtrans_",
        sort_priority: 1,
        schema_fn: schema::video_transcript_schema,
    },
    Handler {
        content_type: ContentType::NtiCard,
        name: "nticard",
        family: Family::Package,
        index_prefix: "nticard_",
        sort_priority: 2,
        schema_fn: schema::nticard_schema,
    },
    Handler {
        content_type: ContentType::Note,
        name: "note",
        family: Family::User,
        index_prefix: "note_",
        sort_priority: 3,
        schema_fn: schema::note_schema,
    },
    Handler {
        content_type: ContentType::Highlight,
        name: "highlight",
        family: Family::User,
        index_prefix: "highlight_",
        sort_priority: 4,
        schema_fn: schema::highlight_schema,
    },
    Handler {
        content_type: ContentType::Redaction,
        name: "redaction",
        family: Family::User,
        index_prefix: "redaction_",
        sort_priority: 5,
        schema_fn: schema::redaction_schema,
    },
    Handler {
        content_type: ContentType::MessageInfo,
        name: "messageinfo",
        family: Family::User,
        index_prefix: "message_",
        sort_priority: 6,
        schema_fn: schema::messageinfo_schema,
    },
    Handler {
        content_type: ContentType::Post,
        name: "post",
        family: Family::User,
        index_prefix: "post_",
        sort_priority: 7,
        schema_fn: schema::post_schema,
    },
];

/// All registered handlers, in type sort order
pub fn registry() -> &'static [Handler] {
    &REGISTRY
}

impl ContentType {
    pub const ALL: [ContentType; 8] = [
        ContentType::Book,
        ContentType::VideoTranscript,
        ContentType::NtiCard,
        ContentType::Note,
        ContentType::Highlight,
        ContentType::Redaction,
        ContentType::MessageInfo,
        ContentType::Post,
    ];

    pub fn handler(self) -> &'static Handler {
        &REGISTRY[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.handler().name
    }

    pub fn family(self) -> Family {
        self.handler().family
    }

    pub fn sort_priority(self) -> u8 {
        self.handler().sort_priority
    }

    /// Types of one family, in sort order
    pub fn of_family(family: Family) -> impl Iterator<Item = ContentType> {
        Self::ALL.into_iter().filter(move |t| t.family() == family)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ContentType {
    type Err = String;

    /// Accepts wire names case-insensitively, plus a few common aliases
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let lower = lower.strip_suffix('s').unwrap_or(&lower);
        match lower {
            "book" | "content" => Ok(ContentType::Book),
            "videotranscript" | "transcript" => Ok(ContentType::VideoTranscript),
            "nticard" | "card" => Ok(ContentType::NtiCard),
            "note" => Ok(ContentType::Note),
            "highlight" => Ok(ContentType::Highlight),
            "redaction" => Ok(ContentType::Redaction),
            "messageinfo" | "message" => Ok(ContentType::MessageInfo),
            "post" => Ok(ContentType::Post),
            _ => Err(format!("unknown content type '{}'", s)),
        }
    }
}
