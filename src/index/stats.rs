use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::content::{ContentType, IndexOwner};
use crate::error::Result;
use crate::index::reader::IndexReader;
use crate::index::storage::{IndexHandle, IndexStorage};

/// Maintenance summary of one index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub name: String,
    pub owner: IndexOwner,
    pub content_type: ContentType,
    pub generation: u64,
    pub segments: usize,
    pub live_docs: u64,
    pub deleted_docs: u64,
    pub vocabulary: usize,
    pub size_bytes: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

impl IndexStats {
    pub fn collect(handle: &IndexHandle) -> Result<Self> {
        let reader = IndexReader::open(handle)?;
        let meta = reader.meta();
        Ok(Self {
            name: meta.name.clone(),
            owner: meta.owner.clone(),
            content_type: meta.content_type,
            generation: meta.generation,
            segments: meta.segments.len(),
            live_docs: meta.live_docs(),
            deleted_docs: meta.deleted_docs(),
            vocabulary: reader.vocabulary().len(),
            size_bytes: dir_size(&handle.dir).unwrap_or(0),
            created_at: meta.created_at,
            updated_at: meta.updated_at,
        })
    }
}

/// Display index statistics
pub fn show_stats(storage: &IndexStorage, name: &str) -> Result<()> {
    let handle = storage.open_index(name)?;
    let stats = IndexStats::collect(&handle)?;

    println!("Index Statistics");
    println!("================");
    println!();
    println!("Name:             {}", stats.name);
    println!("Owner:            {} ({:?})", stats.owner.entity, stats.owner.kind);
    println!("Content type:     {}", stats.content_type);
    println!("Location:         {}", handle.dir.display());
    println!("Generation:       {}", stats.generation);
    println!("Segments:         {}", stats.segments);
    println!("Live documents:   {}", stats.live_docs);
    println!("Deleted docs:     {}", stats.deleted_docs);
    println!("Vocabulary:       {}", stats.vocabulary);
    println!("Index size:       {}", format_size(stats.size_bytes));
    println!();
    println!("Created:          {}", format_timestamp(stats.created_at));
    println!("Updated:          {}", format_timestamp(stats.updated_at));

    Ok(())
}

/// List all indices under the storage root
pub fn list_indexes(storage: &IndexStorage) -> Result<()> {
    let metas = storage.list_indices()?;

    if metas.is_empty() {
        println!("No indices found under {}.", storage.root().display());
        return Ok(());
    }

    println!("Indices");
    println!("=======");
    println!();

    for meta in metas {
        println!("  {}", meta.name);
        println!(
            "    {} / {} ({:?}), {} docs in {} segments",
            meta.content_type,
            meta.owner.entity,
            meta.owner.kind,
            meta.live_docs(),
            meta.segments.len()
        );
    }

    Ok(())
}

/// Calculate directory size (one level; index directories are flat)
fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut size = 0;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if entry.path().is_file() {
            size += entry.metadata()?.len();
        }
    }
    Ok(size)
}

/// Format byte size to human readable
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

fn format_timestamp(ts: u64) -> String {
    use std::time::{Duration, UNIX_EPOCH};
    let datetime = UNIX_EPOCH + Duration::from_secs(ts);
    format!("{:?}", datetime)
}
