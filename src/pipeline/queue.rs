//! Durable message queues.
//!
//! A queue is an ordered list of opaque encoded messages. `drain` takes the
//! whole queue in one step: messages enqueued afterwards land in a fresh
//! queue generation and are never part of the drained batch.
//!
//! A drained batch stays in flight until the consumer acknowledges it. An
//! unacknowledged batch is handed out again by the next `drain` after a
//! [`release`](QueueStore::release) or a restart, so delivery is at least once.

use fs2::FileExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::error::Result;
use crate::utils::{ByteCursor, write_u32_le};

const QUEUE_EXT: &str = "q";
const DRAIN_MARKER: &str = ".drain-";

/// Storage for named message queues
pub trait QueueStore: Send + Sync {
    /// Append a message
    fn push(&self, queue: &str, message: Vec<u8>) -> Result<()>;

    /// Put messages back at the head of the queue, keeping their order
    fn push_front(&self, queue: &str, messages: Vec<Vec<u8>>) -> Result<()>;

    /// Take every message atomically; the batch stays in flight until acknowledged
    fn drain(&self, queue: &str) -> Result<Vec<Vec<u8>>>;

    /// Forget everything drained from the queue so far
    fn acknowledge(&self, queue: &str) -> Result<()>;

    /// Give up on the in-flight batch; the next `drain` starts with it again
    fn release(&self, queue: &str);

    fn len(&self, queue: &str) -> Result<usize>;

    /// Names of queues that may hold messages
    fn queues(&self) -> Result<Vec<String>>;
}

/// Process-local queues
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    queues: Mutex<BTreeMap<String, VecDeque<Vec<u8>>>>,
    in_flight: Mutex<BTreeMap<String, Vec<Vec<u8>>>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueStore for MemoryQueueStore {
    fn push(&self, queue: &str, message: Vec<u8>) -> Result<()> {
        self.queues
            .lock()
            .entry(queue.to_string())
            .or_default()
            .push_back(message);
        Ok(())
    }

    fn push_front(&self, queue: &str, messages: Vec<Vec<u8>>) -> Result<()> {
        let mut queues = self.queues.lock();
        let entry = queues.entry(queue.to_string()).or_default();
        for message in messages.into_iter().rev() {
            entry.push_front(message);
        }
        Ok(())
    }

    fn drain(&self, queue: &str) -> Result<Vec<Vec<u8>>> {
        let batch: Vec<Vec<u8>> = self
            .queues
            .lock()
            .remove(queue)
            .map(Vec::from)
            .unwrap_or_default();
        if !batch.is_empty() {
            self.in_flight
                .lock()
                .entry(queue.to_string())
                .or_default()
                .extend(batch.iter().cloned());
        }
        Ok(batch)
    }

    fn acknowledge(&self, queue: &str) -> Result<()> {
        self.in_flight.lock().remove(queue);
        Ok(())
    }

    fn release(&self, queue: &str) {
        let mut queues = self.queues.lock();
        if let Some(batch) = self.in_flight.lock().remove(queue) {
            let entry = queues.entry(queue.to_string()).or_default();
            for message in batch.into_iter().rev() {
                entry.push_front(message);
            }
        }
    }

    fn len(&self, queue: &str) -> Result<usize> {
        Ok(self.queues.lock().get(queue).map_or(0, VecDeque::len))
    }

    fn queues(&self) -> Result<Vec<String>> {
        Ok(self
            .queues
            .lock()
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(name, _)| name.clone())
            .collect())
    }
}

/// One file per queue under a directory.
///
/// Messages are length-prefixed frames. Writers serialize on an `fs2`
/// lock file per queue, which also orders them against other processes.
/// Draining renames the queue file aside under the lock, so the read and
/// the clear happen in one step. The drain file is deleted only on
/// acknowledgement; one left behind by a crash or a release is picked up
/// by the next drain, ahead of newer messages.
#[derive(Debug, Clone)]
pub struct FileQueueStore {
    dir: PathBuf,
    /// Drain files handed out by this process and not yet acknowledged
    in_flight: Arc<Mutex<BTreeMap<String, Vec<PathBuf>>>>,
}

impl FileQueueStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            in_flight: Arc::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn queue_path(&self, queue: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", file_stem(queue), QUEUE_EXT))
    }

    fn lock(&self, queue: &str) -> Result<File> {
        let path = self.dir.join(format!("{}.lock", file_stem(queue)));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        file.lock_exclusive()?;
        Ok(file)
    }

    /// Drain files left behind for a queue, oldest first
    fn stale_drains(&self, queue: &str) -> Result<Vec<PathBuf>> {
        let prefix = format!("{}.{}{}", file_stem(queue), QUEUE_EXT, DRAIN_MARKER);
        let mut stale: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix))
            })
            .collect();
        stale.sort();
        Ok(stale)
    }
}

impl QueueStore for FileQueueStore {
    fn push(&self, queue: &str, message: Vec<u8>) -> Result<()> {
        let lock = self.lock(queue)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.queue_path(queue))?;
        let mut writer = BufWriter::new(file);
        write_frame(&mut writer, &message)?;
        writer.flush()?;
        writer.get_ref().sync_data()?;
        FileExt::unlock(&lock)?;
        Ok(())
    }

    fn push_front(&self, queue: &str, messages: Vec<Vec<u8>>) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let lock = self.lock(queue)?;
        let path = self.queue_path(queue);
        let existing = read_frames_if_exists(&path)?;

        let tmp = path.with_extension("q.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for message in messages.iter().chain(existing.iter()) {
                write_frame(&mut writer, message)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        FileExt::unlock(&lock)?;

        debug!(queue, requeued = messages.len(), "messages returned to queue head");
        Ok(())
    }

    fn drain(&self, queue: &str) -> Result<Vec<Vec<u8>>> {
        let lock = self.lock(queue)?;
        let path = self.queue_path(queue);

        let mut in_flight = self.in_flight.lock();
        let held = in_flight.entry(queue.to_string()).or_default();
        let mut batches: Vec<PathBuf> = self
            .stale_drains(queue)?
            .into_iter()
            .filter(|p| !held.contains(p))
            .collect();
        if path.exists() {
            let mut nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            let drain_path = |nanos: u128| {
                self.dir.join(format!(
                    "{}.{}{}{:032}",
                    file_stem(queue),
                    QUEUE_EXT,
                    DRAIN_MARKER,
                    nanos
                ))
            };
            // unacknowledged batches keep their files; never overwrite one
            let mut aside = drain_path(nanos);
            while aside.exists() {
                nanos += 1;
                aside = drain_path(nanos);
            }
            fs::rename(&path, &aside)?;
            batches.push(aside);
        }
        held.extend(batches.iter().cloned());
        drop(in_flight);
        FileExt::unlock(&lock)?;

        let mut messages = Vec::new();
        for batch in &batches {
            messages.extend(read_frames(batch)?);
        }
        Ok(messages)
    }

    fn acknowledge(&self, queue: &str) -> Result<()> {
        let done = self.in_flight.lock().remove(queue).unwrap_or_default();
        for batch in &done {
            match fs::remove_file(batch) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %batch.display(), error = %e, "could not remove acknowledged batch");
                    return Err(e.into());
                }
            }
        }
        debug!(queue, files = done.len(), "acknowledged drained batches");
        Ok(())
    }

    fn release(&self, queue: &str) {
        if let Some(kept) = self.in_flight.lock().remove(queue) {
            warn!(queue, files = kept.len(), "drained batch released for redelivery");
        }
    }

    fn len(&self, queue: &str) -> Result<usize> {
        let lock = self.lock(queue)?;
        let count = read_frames_if_exists(&self.queue_path(queue))?.len();
        FileExt::unlock(&lock)?;
        Ok(count)
    }

    fn queues(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let suffix = format!(".{}", QUEUE_EXT);
            let stem = match name.find(DRAIN_MARKER) {
                Some(i) => name[..i].strip_suffix(&suffix),
                None => name.strip_suffix(&suffix),
            };
            if let Some(stem) = stem {
                names.push(stem.to_string());
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// File-safe queue name; already-safe names map to themselves
fn file_stem(queue: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    if !queue.is_empty() && queue.chars().all(safe) {
        return queue.to_string();
    }

    let cleaned: String = queue.chars().map(|c| if safe(c) { c } else { '_' }).collect();
    let digest = Sha256::digest(queue.as_bytes());
    let hash: String = digest[..4].iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}-{}", cleaned, hash)
}

fn write_frame<W: Write>(writer: &mut W, message: &[u8]) -> Result<()> {
    write_u32_le(writer, message.len() as u32)?;
    writer.write_all(message)?;
    Ok(())
}

fn read_frames_if_exists(path: &Path) -> Result<Vec<Vec<u8>>> {
    if path.exists() { read_frames(path) } else { Ok(Vec::new()) }
}

/// Frames of a queue file; a torn trailing frame is dropped with a warning
fn read_frames(path: &Path) -> Result<Vec<Vec<u8>>> {
    let data = fs::read(path)?;
    let mut cursor = ByteCursor::new(&data);
    let mut frames = Vec::new();

    while cursor.position() < data.len() {
        let frame = cursor
            .u32()
            .and_then(|len| cursor.bytes(len as usize));
        match frame {
            Some(frame) => frames.push(frame.to_vec()),
            None => {
                warn!(path = %path.display(), kept = frames.len(), "truncated queue frame dropped");
                break;
            }
        }
    }
    Ok(frames)
}
