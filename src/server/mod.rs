//! Long-running search daemon.
//!
//! The daemon keeps one `SearchEngine` and its open readers warm across
//! requests and runs the queue consumer. The CLI talks to it through
//! [`IndexClient`] over a Unix socket and opens the data directory itself
//! when no daemon answers.

mod client;
#[path = "daemon_unix.rs"]
pub mod daemon;
pub mod protocol;

pub use client::{ClientError, ClientResult, IndexClient};

use std::fs;
use std::path::PathBuf;

/// Socket the daemon listens on
pub fn get_socket_path() -> PathBuf {
    runtime_path("sock")
}

/// Pid file of the running daemon
pub fn get_pid_path() -> PathBuf {
    runtime_path("pid")
}

/// `fedsearch.<ext>` in the per-user runtime directory, else under
/// `~/.local/run`, else a uid-suffixed file in `/tmp`
fn runtime_path(ext: &str) -> PathBuf {
    let file = format!("fedsearch.{}", ext);
    if let Some(runtime_dir) = std::env::var_os("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(file);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".local").join("run").join(file);
    }

    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/fedsearch-{}.{}", uid, ext))
}

/// Whether the pid file names a live process
pub fn is_daemon_running() -> bool {
    let Ok(contents) = fs::read_to_string(get_pid_path()) else {
        return false;
    };
    match contents.trim().parse::<libc::pid_t>() {
        // signal 0 checks for existence without delivering anything
        Ok(pid) if pid > 0 => unsafe { libc::kill(pid, 0) == 0 },
        _ => false,
    }
}
