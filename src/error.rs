//! Error taxonomy for the search engine.
//!
//! Storage and lock errors are retried where they occur and only surface
//! once retries are exhausted. Query syntax problems never surface at all:
//! the parser degrades them to literal term matches.

use std::io;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Debug, Error)]
pub enum SearchError {
    /// Exclusive writer lock not acquired within the retry budget
    #[error("could not acquire writer lock for index '{index}' after {attempts} attempts")]
    LockTimeout { index: String, attempts: u32 },

    /// A write failed; the pending change set was discarded
    #[error("write to index '{index}' failed: {reason}")]
    WriteFailure { index: String, reason: String },

    /// An async operation referenced an object that no longer exists
    #[error("object '{docid}' for entity '{entity}' no longer exists")]
    BrokenReference { entity: String, docid: String },

    /// Malformed query syntax (handled internally, never returned by search)
    #[error("could not parse query '{0}'")]
    QueryParseFailure(String),

    /// Index does not exist on disk
    #[error("index '{0}' does not exist")]
    IndexMissing(String),

    /// Index already exists on create
    #[error("index '{0}' already exists")]
    IndexExists(String),

    /// On-disk data failed validation
    #[error("corrupt index data in {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SearchError {
    pub fn corrupt(path: impl Into<String>, reason: impl Into<String>) -> Self {
        SearchError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn write_failure(index: impl Into<String>, reason: impl ToString) -> Self {
        SearchError::WriteFailure {
            index: index.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors a search leg treats as "no results" rather than failure
    pub fn is_index_missing(&self) -> bool {
        matches!(self, SearchError::IndexMissing(_))
    }
}
