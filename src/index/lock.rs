//! Exclusive writer lock with bounded, jittered retry.

use fs2::FileExt;
use rand::Rng;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, SearchError};
use crate::index::types::LOCK_FILE;

/// Retry budget for acquiring an index writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 40,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
        }
    }
}

impl LockPolicy {
    pub fn new(max_attempts: u32, min_delay_ms: u64, max_delay_ms: u64) -> Self {
        let min = min_delay_ms.min(max_delay_ms);
        Self {
            max_attempts: max_attempts.max(1),
            min_delay: Duration::from_millis(min),
            max_delay: Duration::from_millis(max_delay_ms.max(min)),
        }
    }

    fn jitter(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        rand::thread_rng().gen_range(self.min_delay..=self.max_delay)
    }
}

/// Held exclusive lock on `<index>/write.lock`. Released on drop.
///
/// The lock is an OS file lock on a fresh handle, so it excludes other
/// processes and other threads of this process alike.
#[derive(Debug)]
pub struct WriterLock {
    file: File,
    path: PathBuf,
}

impl WriterLock {
    /// Acquire the lock, sleeping a random delay between attempts
    pub fn acquire(index_dir: &Path, index_name: &str, policy: &LockPolicy) -> Result<Self> {
        let path = index_dir.join(LOCK_FILE);

        for attempt in 1..=policy.max_attempts {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;

            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(index = index_name, attempt, "writer lock acquired");
                    return Ok(Self { file, path });
                }
                Err(e) if !is_contended(&e) => {
                    warn!(index = index_name, path = %path.display(), error = %e, "writer lock failed");
                    return Err(SearchError::Io(e));
                }
                Err(_) if attempt < policy.max_attempts => {
                    let delay = policy.jitter();
                    debug!(
                        index = index_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "writer lock busy, retrying"
                    );
                    thread::sleep(delay);
                }
                Err(_) => break,
            }
        }

        warn!(
            index = index_name,
            attempts = policy.max_attempts,
            "gave up waiting for writer lock"
        );
        Err(SearchError::LockTimeout {
            index: index_name.to_string(),
            attempts: policy.max_attempts,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Whether a failed `try_lock` means another holder, as opposed to a broken lock file
fn is_contended(e: &io::Error) -> bool {
    if e.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    let code = e.raw_os_error();
    code.is_some() && code == fs2::lock_contended_error().raw_os_error()
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release writer lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::TempDir;

    fn fast_policy(attempts: u32) -> LockPolicy {
        LockPolicy::new(attempts, 1, 3)
    }

    #[test]
    fn test_second_writer_times_out() {
        let dir = TempDir::new().unwrap();
        let _held = WriterLock::acquire(dir.path(), "idx", &fast_policy(3)).unwrap();

        let err = WriterLock::acquire(dir.path(), "idx", &fast_policy(3)).unwrap_err();
        match err {
            SearchError::LockTimeout { index, attempts } => {
                assert_eq!(index, "idx");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = TempDir::new().unwrap();
        {
            let _held = WriterLock::acquire(dir.path(), "idx", &fast_policy(1)).unwrap();
        }
        assert!(WriterLock::acquire(dir.path(), "idx", &fast_policy(1)).is_ok());
    }

    #[test]
    fn test_waiter_gets_lock_after_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();
        let held = WriterLock::acquire(&path, "idx", &fast_policy(1)).unwrap();

        let waiter = {
            let path = path.clone();
            thread::spawn(move || WriterLock::acquire(&path, "idx", &fast_policy(200)).is_ok())
        };

        thread::sleep(Duration::from_millis(20));
        drop(held);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_only_contention_is_retried() {
        assert!(is_contended(&fs2::lock_contended_error()));
        assert!(is_contended(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_contended(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!is_contended(&io::Error::other("no locks available")));
    }

    #[test]
    fn test_missing_directory_is_io_error() {
        let dir = TempDir::new().unwrap();
        let gone = dir.path().join("gone");

        let start = Instant::now();
        let err = WriterLock::acquire(&gone, "idx", &LockPolicy::new(50, 20, 40)).unwrap_err();
        assert!(matches!(err, SearchError::Io(_)), "{err:?}");
        // failed on the first attempt instead of sleeping through the budget
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_within_bounds() {
        let policy = LockPolicy::new(5, 10, 20);
        let start = Instant::now();
        for _ in 0..50 {
            let d = policy.jitter();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
