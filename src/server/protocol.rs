//! Wire messages between the CLI and the daemon.
//!
//! Every frame is a little-endian `u32` body length followed by the body,
//! a JSON object whose `type` field names the variant.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

use crate::content::{ContentType, EntityKind, IndexedDocument};
use crate::engine::EngineStats;
use crate::pipeline::OperationKind;
use crate::query::SearchQuery;
use crate::results::{SearchResults, SuggestResults};

/// Largest accepted message body
const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    Search { query: SearchQuery },

    Suggest { query: SearchQuery },

    SuggestAndSearch { query: SearchQuery },

    /// Upsert a document into an entity's index
    Index {
        entity: String,
        kind: EntityKind,
        document: IndexedDocument,
    },

    Delete {
        entity: String,
        kind: EntityKind,
        content_type: ContentType,
        oid: String,
    },

    /// Queue a write for the background consumer
    Enqueue {
        entity: String,
        kind: EntityKind,
        content_type: ContentType,
        op: OperationKind,
        docid: String,
    },

    Status,

    Shutdown,

    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Search(SearchResponse),

    Suggest(SuggestResults),

    Indexed { generation: u64, added: usize },

    Deleted { found: bool },

    Enqueued { version: u64 },

    Status(StatusResponse),

    ShuttingDown,

    Pong,

    /// The request failed; `message` is the rendered error
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: SearchResults,
    pub duration_ms: f64,
    /// Served from the daemon's query cache
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub queries_served: u64,
    /// Fraction of searches answered from the query cache
    pub cache_hit_rate: f32,
    pub indices: usize,
    /// Messages waiting across all queues
    pub pending_operations: usize,
    pub engine: EngineStats,
}

fn invalid(e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

/// Frame and send one message
pub fn write_message<W: Write>(writer: &mut W, msg: &impl Serialize) -> io::Result<()> {
    let body = serde_json::to_vec(msg).map_err(invalid)?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len as usize <= MAX_MESSAGE_BYTES)
        .ok_or_else(|| invalid(format!("message of {} bytes exceeds the frame limit", body.len())))?;

    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&body)?;
    writer.flush()
}

/// Receive and decode one framed message
pub fn read_message<R: Read, T: DeserializeOwned>(reader: &mut R) -> io::Result<T> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix)?;
    let len = u32::from_le_bytes(prefix) as usize;
    if len > MAX_MESSAGE_BYTES {
        return Err(invalid(format!("frame of {} bytes exceeds the limit", len)));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    serde_json::from_slice(&body).map_err(invalid)
}
