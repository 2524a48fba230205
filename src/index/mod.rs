//! Per-entity physical indices.
//!
//! An index is a directory of immutable segments plus a manifest
//! (`meta.json`). Writers are exclusive per index and buffer changes until
//! commit; readers are snapshots of one manifest generation.

pub mod lock;
pub mod reader;
pub mod segment;
pub mod stats;
pub mod storage;
pub mod types;
pub mod writer;

pub use lock::{LockPolicy, WriterLock};
pub use reader::IndexReader;
pub use stats::IndexStats;
pub use storage::{IndexHandle, IndexStorage, index_name};
pub use types::*;
pub use writer::{CommitStats, IndexWriter};
