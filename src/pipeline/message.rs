use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::content::{ContentType, EntityKind, IndexOwner};
use crate::error::{Result, SearchError};

const ZSTD_LEVEL: i32 = 3;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Add,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Add => "add",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "add" | "index" => Ok(OperationKind::Add),
            "update" | "modify" => Ok(OperationKind::Update),
            "delete" | "remove" => Ok(OperationKind::Delete),
            _ => Err(format!("unknown operation '{}'", s)),
        }
    }
}

/// A queued write against one entity's index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    pub kind: OperationKind,
    pub docid: String,
    pub entity: String,
    pub entity_kind: EntityKind,
    pub content_type: ContentType,
    /// Microseconds since epoch plus a process-wide sequence
    pub version: u64,
    /// Unix seconds after which the message is dropped
    pub expires_at: u64,
}

impl QueuedOperation {
    pub fn new(
        kind: OperationKind,
        docid: impl Into<String>,
        owner: &IndexOwner,
        content_type: ContentType,
        ttl_secs: u64,
    ) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            kind,
            docid: docid.into(),
            entity: owner.entity.clone(),
            entity_kind: owner.kind,
            content_type,
            version: now.as_micros() as u64 + SEQUENCE.fetch_add(1, Ordering::Relaxed),
            expires_at: now.as_secs().saturating_add(ttl_secs),
        }
    }

    pub fn owner(&self) -> IndexOwner {
        IndexOwner::new(self.entity.clone(), self.entity_kind)
    }

    pub fn is_expired(&self, now_secs: u64) -> bool {
        now_secs > self.expires_at
    }

    /// JSON compressed with zstd
    pub fn encode(&self) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        zstd::encode_all(json.as_slice(), ZSTD_LEVEL).map_err(|e| SearchError::Codec(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let json = zstd::decode_all(bytes).map_err(|e| SearchError::Codec(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| SearchError::Codec(e.to_string()))
    }
}
