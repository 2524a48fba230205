//! # fedsearch - Federated Full-Text Search
//!
//! fedsearch indexes the content of an e-learning platform into many small
//! per-entity indices and answers a search by fanning out over every index
//! the requester can see, then merging the ranked hits.
//!
//! ## Architecture
//!
//! - [`content`] - Content types, their schemas and the searchable document
//! - [`index`] - Segmented on-disk indices, writer locks and merging
//! - [`query`] - Search requests, query parsing, scoring and top-k collection
//! - [`highlight`] - Snippets and match fragments
//! - [`results`] - Hits, result merging and the comparator chain
//! - [`suggest`] - Edit-distance word suggestions
//! - [`engine`] - The federated search coordinator
//! - [`pipeline`] - Queued asynchronous indexing
//! - [`server`] - Unix socket daemon and client
//! - [`output`] - Colored terminal output
//! - [`utils`] - Configuration, analyzers, encodings and logging
//!
//! ## Quick Start
//!
//! ```no_run
//! use fedsearch::content::{ContentType, EntityKind, IndexOwner, IndexedDocument};
//! use fedsearch::engine::SearchEngine;
//! use fedsearch::query::SearchQuery;
//! use fedsearch::utils::AppConfig;
//!
//! let engine = SearchEngine::new("/tmp/fedsearch", AppConfig::default()).unwrap();
//! let alice = IndexOwner::new("alice", EntityKind::User);
//! engine
//!     .index(&alice, IndexedDocument::new("n1", ContentType::Note, "Become my Shield"))
//!     .unwrap();
//!
//! let results = engine.search(&SearchQuery::new("shield").with_username("alice"));
//! for hit in &results.hits {
//!     println!("{} {}", hit.oid, hit.snippet);
//! }
//! ```

pub mod content;
pub mod engine;
pub mod error;
pub mod highlight;
pub mod index;
pub mod output;
pub mod pipeline;
pub mod query;
pub mod results;
#[cfg(all(unix, feature = "daemon"))]
pub mod server;
pub mod suggest;
pub mod utils;

pub use error::{Result, SearchError};
