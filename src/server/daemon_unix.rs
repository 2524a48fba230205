//! Unix search server daemon
//!
//! Keeps one [`SearchEngine`] warm, serves requests over a Unix socket and
//! runs the queue consumer in the background.

use crate::content::IndexOwner;
use crate::engine::SearchEngine;
use crate::pipeline::{
    DirectoryResolver, FileQueueStore, IndexApplier, OBJECTS_DIR, OperationQueue, QUEUES_DIR,
    QueueConsumer, QueueStore,
};
use crate::query::SearchQuery;
use crate::results::SearchResults;
use crate::server::protocol::{
    Request, Response, SearchResponse, StatusResponse, read_message, write_message,
};
use crate::server::{get_pid_path, get_socket_path};
use crate::utils::AppConfig;
use anyhow::{Context, Result};
use lru::LruCache;
use parking_lot::Mutex;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::num::NonZeroUsize;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Query cache capacity
const CACHE_SIZE: usize = 128;

/// Cached results older than this are recomputed, so commits from other
/// processes become visible
const CACHE_TTL: Duration = Duration::from_secs(10);

/// Connection timeout
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum QueryKind {
    Search,
    SuggestAndSearch,
}

struct CachedResults {
    results: SearchResults,
    write_epoch: u64,
    stored_at: Instant,
}

/// Statistics for the server
struct ServerStats {
    start_time: Instant,
    queries_served: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl ServerStats {
    fn new() -> Self {
        Self {
            start_time: Instant::now(),
            queries_served: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    fn cache_hit_rate(&self) -> f32 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f32 / total as f32
        }
    }
}

/// The search server daemon
pub struct SearchServer {
    engine: Arc<SearchEngine>,
    queue: OperationQueue,
    store: Arc<FileQueueStore>,
    resolver: Arc<DirectoryResolver>,
    query_cache: Mutex<LruCache<(QueryKind, String), CachedResults>>,
    socket_path: PathBuf,
    pid_path: PathBuf,
    consumer_interval: Duration,
    stats: ServerStats,
    shutdown: AtomicBool,
}

impl SearchServer {
    /// Server over the data directory named by the config, on the default socket
    pub fn new(config: AppConfig) -> Result<Arc<Self>> {
        Self::with_paths(config, get_socket_path(), get_pid_path())
    }

    pub fn with_paths(config: AppConfig, socket_path: PathBuf, pid_path: PathBuf) -> Result<Arc<Self>> {
        let data_dir = config.effective_data_dir()?;
        let store = Arc::new(
            FileQueueStore::open(data_dir.join(QUEUES_DIR)).context("Failed to open queue store")?,
        );
        let resolver = Arc::new(DirectoryResolver::new(data_dir.join(OBJECTS_DIR)));
        let queue = OperationQueue::new(store.clone(), config.queue_expiry_secs);
        let consumer_interval = Duration::from_millis(config.queue_interval_ms.max(1));
        let engine = Arc::new(SearchEngine::new(&data_dir, config).context("Failed to start search engine")?);

        Ok(Arc::new(Self {
            engine,
            queue,
            store,
            resolver,
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_SIZE).unwrap_or(NonZeroUsize::MIN),
            )),
            socket_path,
            pid_path,
            consumer_interval,
            stats: ServerStats::new(),
            shutdown: AtomicBool::new(false),
        }))
    }

    pub fn engine(&self) -> &Arc<SearchEngine> {
        &self.engine
    }

    /// Start the server (blocking)
    pub fn run(self: &Arc<Self>) -> Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Remove stale socket file
        if self.socket_path.exists() {
            fs::remove_file(&self.socket_path)?;
        }

        fs::write(&self.pid_path, format!("{}", std::process::id()))?;

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind to {}", self.socket_path.display()))?;

        // Set socket permissions (user only)
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.socket_path, fs::Permissions::from_mode(0o600))?;
        }

        let applier: Arc<dyn IndexApplier> = self.engine.clone();
        let consumer = QueueConsumer::new(self.store.clone(), self.resolver.clone(), applier)
            .spawn(self.consumer_interval);

        info!(socket = %self.socket_path.display(), "listening");

        for stream in listener.incoming() {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            match stream {
                Ok(stream) => {
                    let _ = stream.set_read_timeout(Some(CONNECTION_TIMEOUT));
                    let _ = stream.set_write_timeout(Some(CONNECTION_TIMEOUT));

                    let server = Arc::clone(self);
                    thread::spawn(move || {
                        if let Err(e) = server.handle_connection(stream) {
                            debug!(error = %e, "connection closed with error");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            }
        }

        consumer.stop();
        let _ = fs::remove_file(&self.socket_path);
        let _ = fs::remove_file(&self.pid_path);
        info!("server stopped");

        Ok(())
    }

    /// Handle a single client connection
    fn handle_connection(&self, stream: UnixStream) -> Result<()> {
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut writer = BufWriter::new(stream);

        loop {
            let request: Request = match read_message(&mut reader) {
                Ok(req) => req,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    // Client disconnected
                    break;
                }
                Err(e) => {
                    let resp = Response::Error {
                        message: format!("Invalid request: {}", e),
                    };
                    write_message(&mut writer, &resp)?;
                    continue;
                }
            };

            let response = self.handle_request(request);
            write_message(&mut writer, &response)?;

            if matches!(response, Response::ShuttingDown) {
                // wake the accept loop so it sees the flag
                let _ = UnixStream::connect(&self.socket_path);
                break;
            }
        }

        Ok(())
    }

    /// Handle a single request
    pub fn handle_request(&self, request: Request) -> Response {
        match request {
            Request::Search { query } => self.handle_search(QueryKind::Search, query),

            Request::SuggestAndSearch { query } => {
                self.handle_search(QueryKind::SuggestAndSearch, query)
            }

            Request::Suggest { query } => {
                self.stats.queries_served.fetch_add(1, Ordering::Relaxed);
                Response::Suggest(self.engine.suggest(&query))
            }

            Request::Index {
                entity,
                kind,
                document,
            } => match self.engine.index(&IndexOwner::new(entity, kind), document) {
                Ok(stats) => Response::Indexed {
                    generation: stats.generation,
                    added: stats.added,
                },
                Err(e) => Response::Error {
                    message: format!("Index failed: {}", e),
                },
            },

            Request::Delete {
                entity,
                kind,
                content_type,
                oid,
            } => match self
                .engine
                .delete(&IndexOwner::new(entity, kind), content_type, &oid)
            {
                Ok(found) => Response::Deleted { found },
                Err(e) => Response::Error {
                    message: format!("Delete failed: {}", e),
                },
            },

            Request::Enqueue {
                entity,
                kind,
                content_type,
                op,
                docid,
            } => match self
                .queue
                .enqueue(op, &IndexOwner::new(entity, kind), content_type, &docid)
            {
                Ok(queued) => Response::Enqueued {
                    version: queued.version,
                },
                Err(e) => Response::Error {
                    message: format!("Enqueue failed: {}", e),
                },
            },

            Request::Status => self.handle_status(),

            Request::Shutdown => {
                info!("shutdown requested");
                self.shutdown.store(true, Ordering::SeqCst);
                Response::ShuttingDown
            }

            Request::Ping => Response::Pong,
        }
    }

    fn write_epoch(&self) -> u64 {
        let stats = self.engine.stats();
        stats.documents_indexed + stats.documents_deleted
    }

    fn handle_search(&self, kind: QueryKind, query: SearchQuery) -> Response {
        let start = Instant::now();
        self.stats.queries_served.fetch_add(1, Ordering::Relaxed);

        let key = match serde_json::to_string(&query) {
            Ok(json) => (kind, json),
            Err(e) => {
                return Response::Error {
                    message: format!("Invalid query: {}", e),
                };
            }
        };
        let epoch = self.write_epoch();

        if let Some(cached) = self.query_cache.lock().get(&key)
            && cached.write_epoch == epoch
            && cached.stored_at.elapsed() < CACHE_TTL
        {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Response::Search(SearchResponse {
                results: cached.results.clone(),
                duration_ms: start.elapsed().as_secs_f64() * 1000.0,
                cached: true,
            });
        }
        self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);

        let results = match kind {
            QueryKind::Search => self.engine.search(&query),
            QueryKind::SuggestAndSearch => self.engine.suggest_and_search(&query),
        };

        self.query_cache.lock().put(
            key,
            CachedResults {
                results: results.clone(),
                write_epoch: epoch,
                stored_at: Instant::now(),
            },
        );

        Response::Search(SearchResponse {
            results,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
            cached: false,
        })
    }

    /// Handle status request
    fn handle_status(&self) -> Response {
        let indices = match self.engine.storage().list_indices() {
            Ok(metas) => metas.len(),
            Err(e) => {
                return Response::Error {
                    message: format!("Failed to list indices: {}", e),
                };
            }
        };

        let pending_operations = self
            .store
            .queues()
            .map(|queues| {
                queues
                    .iter()
                    .map(|q| self.store.len(q).unwrap_or(0))
                    .sum()
            })
            .unwrap_or(0);

        Response::Status(StatusResponse {
            uptime_secs: self.stats.start_time.elapsed().as_secs(),
            queries_served: self.stats.queries_served.load(Ordering::Relaxed),
            cache_hit_rate: self.stats.cache_hit_rate(),
            indices,
            pending_operations,
            engine: self.engine.stats(),
        })
    }
}

/// Point stdin, stdout and stderr at `/dev/null`
fn detach_stdio() {
    unsafe {
        let null = libc::open(c"/dev/null".as_ptr(), libc::O_RDWR);
        if null < 0 {
            return;
        }
        for fd in 0..=2 {
            libc::dup2(null, fd);
        }
        if null > 2 {
            libc::close(null);
        }
    }
}

/// Run the server in a detached grandchild and return in the caller.
///
/// The intermediate child calls `setsid` and exits, so the server never
/// reacquires a controlling terminal.
pub fn daemonize(config: AppConfig) -> Result<()> {
    let child = unsafe { libc::fork() };
    if child < 0 {
        anyhow::bail!("fork failed: {}", std::io::Error::last_os_error());
    }
    if child > 0 {
        let mut status: libc::c_int = 0;
        unsafe { libc::waitpid(child, &mut status, 0) };
        return Ok(());
    }

    // intermediate child: never returns to the caller
    if unsafe { libc::setsid() } < 0 || unsafe { libc::fork() } != 0 {
        std::process::exit(0);
    }

    detach_stdio();
    let _ = std::env::set_current_dir("/");
    if let Err(e) = SearchServer::new(config).and_then(|server| server.run()) {
        // stderr is gone; leave the reason next to the pid file
        let _ = fs::write(get_pid_path().with_extension("err"), format!("{:#}", e));
    }
    std::process::exit(0);
}

/// Serve in the calling process until shutdown
pub fn run_foreground(config: AppConfig) -> Result<()> {
    SearchServer::new(config)?.run().inspect_err(|e| {
        error!(error = %e, "server failed");
    })
}

fn process_alive(pid: libc::pid_t) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Terminate the daemon named by the pid file, escalating to SIGKILL after
/// a grace period. Returns false when no pid file exists.
pub fn stop_daemon() -> Result<bool> {
    let pid_path = get_pid_path();
    let contents = match fs::read_to_string(&pid_path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e).context("Failed to read pid file"),
    };
    let pid: libc::pid_t = contents.trim().parse().context("Invalid pid file")?;

    if pid > 0 && unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
        let deadline = Instant::now() + Duration::from_millis(1500);
        while process_alive(pid) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(50));
        }
        if process_alive(pid) {
            warn!(pid, "daemon ignored SIGTERM, killing");
            unsafe { libc::kill(pid, libc::SIGKILL) };
        }
    }

    let _ = fs::remove_file(get_socket_path());
    let _ = fs::remove_file(&pid_path);
    Ok(true)
}
