use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fedsearch::content::{ContentType, EntityKind, IndexOwner, IndexedDocument};
use fedsearch::engine::SearchEngine;
use fedsearch::index::stats::{list_indexes, show_stats};
use fedsearch::output::{print_results, print_suggestions};
use fedsearch::pipeline::{
    DirectoryResolver, FileQueueStore, IndexApplier, OBJECTS_DIR, OperationKind, OperationQueue,
    QUEUES_DIR, QueueConsumer,
};
use fedsearch::query::{SearchQuery, SortOn};
use fedsearch::server::{self, IndexClient, get_socket_path, is_daemon_running};
use fedsearch::utils::{AppConfig, init_logging};

#[derive(Parser)]
#[command(name = "fedsearch")]
#[command(about = "Federated full-text search over per-entity content indices")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory (overrides config and FEDSEARCH_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(clap::Args)]
struct Scope {
    /// Search the user's indices, their groups' and those shared with them
    #[arg(short, long)]
    user: Option<String>,

    /// Search a content package's indices
    #[arg(short, long)]
    package: Option<String>,

    /// Restrict to these content types (comma separated)
    #[arg(long, value_delimiter = ',')]
    search_on: Vec<ContentType>,
}

#[derive(Subcommand)]
enum Commands {
    /// Index documents from a JSON file (one object or an array)
    Index {
        entity: String,
        #[arg(value_name = "TYPE")]
        content_type: ContentType,
        file: PathBuf,
        /// Owner kind (defaults by content type)
        #[arg(long)]
        kind: Option<EntityKind>,
    },
    /// Delete a document by oid
    Delete {
        entity: String,
        #[arg(value_name = "TYPE")]
        content_type: ContentType,
        oid: String,
        #[arg(long)]
        kind: Option<EntityKind>,
    },
    /// Search
    Search {
        term: String,
        #[command(flatten)]
        scope: Scope,
        #[arg(long)]
        sort_on: Option<SortOn>,
        /// Oldest first for date sorts
        #[arg(long)]
        ascending: bool,
        /// Reference location for relevance sorting
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        batch_start: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
        /// Search the best suggestion for a misspelled word
        #[arg(long)]
        suggest: bool,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Suggest words close to a term
    Suggest {
        term: String,
        #[command(flatten)]
        scope: Scope,
        #[arg(long)]
        maxdist: Option<usize>,
        #[arg(long)]
        prefix: Option<usize>,
    },
    /// Show statistics of one index
    Stats { name: String },
    /// Merge all segments of an index into one
    Optimize { name: String },
    /// List all indices
    List,
    /// Queue an add, update or delete for the background consumer
    Enqueue {
        entity: String,
        #[arg(value_name = "TYPE")]
        content_type: ContentType,
        op: OperationKind,
        oid: String,
        #[arg(long)]
        kind: Option<EntityKind>,
    },
    /// Apply all queued operations now
    Drain,
    /// Start the search server daemon (keeps readers warm, runs the queue consumer)
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the daemon in background
    Start,
    /// Stop the running daemon
    Stop,
    /// Check daemon status
    Status,
    /// Run daemon in foreground (for debugging)
    Foreground,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut config = AppConfig::load()?;
    let explicit_dir = cli.data_dir.is_some();
    if let Some(dir) = cli.data_dir {
        config.data_dir = Some(dir);
    }
    let color = !cli.no_color;

    match cli.command {
        Commands::Index {
            entity,
            content_type,
            file,
            kind,
        } => {
            let owner = owner(entity, kind, content_type);
            let docs = read_documents(&file, content_type)?;
            let count = docs.len();
            let stats = open_engine(&config)?
                .index_batch(&owner, content_type, docs)
                .with_context(|| format!("Failed to index {}", file.display()))?;
            println!(
                "Indexed {} documents (generation {}, {} segments)",
                count, stats.generation, stats.segments
            );
        }
        Commands::Delete {
            entity,
            content_type,
            oid,
            kind,
        } => {
            let owner = owner(entity, kind, content_type);
            if open_engine(&config)?.delete(&owner, content_type, &oid)? {
                println!("Deleted {}", oid);
            } else {
                println!("Not found: {}", oid);
            }
        }
        Commands::Search {
            term,
            scope,
            sort_on,
            ascending,
            location,
            limit,
            batch_start,
            batch_size,
            suggest,
            json,
        } => {
            let mut query = scoped_query(term, scope);
            query.sort_on = sort_on;
            query.sort_descending = ascending.then_some(false);
            query.location = location;
            query.limit = limit;
            query.batch_start = batch_start;
            query.batch_size = batch_size;

            let results = match daemon_client(explicit_dir) {
                Some(mut client) if suggest => client.suggest_and_search(&query)?.results,
                Some(mut client) => client.search(&query)?.results,
                None if suggest => open_engine(&config)?.suggest_and_search(&query),
                None => open_engine(&config)?.search(&query),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_results(&results, color)?;
            }
        }
        Commands::Suggest {
            term,
            scope,
            maxdist,
            prefix,
        } => {
            let mut query = scoped_query(term, scope);
            query.maxdist = maxdist;
            query.prefix = prefix;
            let results = match daemon_client(explicit_dir) {
                Some(mut client) => client.suggest(&query)?,
                None => open_engine(&config)?.suggest(&query),
            };
            print_suggestions(&results, color)?;
        }
        Commands::Stats { name } => {
            let engine = open_engine(&config)?;
            show_stats(engine.storage(), &name)?;
        }
        Commands::Optimize { name } => {
            let stats = open_engine(&config)?.optimize(&name)?;
            println!("Optimized {} ({} segments merged)", name, stats.merged);
        }
        Commands::List => {
            let engine = open_engine(&config)?;
            list_indexes(engine.storage())?;
        }
        Commands::Enqueue {
            entity,
            content_type,
            op,
            oid,
            kind,
        } => {
            let owner = owner(entity, kind, content_type);
            let data_dir = config.effective_data_dir()?;
            let store = Arc::new(FileQueueStore::open(data_dir.join(QUEUES_DIR))?);
            let queued = OperationQueue::new(store, config.queue_expiry_secs)
                .enqueue(op, &owner, content_type, &oid)?;
            println!("Queued {} of {} (version {})", op, oid, queued.version);
        }
        Commands::Drain => {
            let data_dir = config.effective_data_dir()?;
            let store = Arc::new(FileQueueStore::open(data_dir.join(QUEUES_DIR))?);
            let resolver = Arc::new(DirectoryResolver::new(data_dir.join(OBJECTS_DIR)));
            let applier: Arc<dyn IndexApplier> = Arc::new(open_engine(&config)?);
            let stats = QueueConsumer::new(store, resolver, applier).process_all()?;
            println!(
                "Applied {}, skipped {}, expired {}, dropped {}, requeued {}",
                stats.applied, stats.skipped, stats.expired, stats.dropped, stats.requeued
            );
        }
        Commands::Daemon { action } => {
            handle_daemon_command(action, config)?;
        }
    }

    Ok(())
}

fn open_engine(config: &AppConfig) -> Result<SearchEngine> {
    let data_dir = config.effective_data_dir()?;
    SearchEngine::new(&data_dir, config.clone())
        .with_context(|| format!("Failed to open data directory {}", data_dir.display()))
}

/// The daemon serves the default data directory only
fn daemon_client(explicit_dir: bool) -> Option<IndexClient> {
    if explicit_dir {
        return None;
    }
    IndexClient::connect()
}

fn owner(entity: String, kind: Option<EntityKind>, content_type: ContentType) -> IndexOwner {
    IndexOwner::new(entity, kind.unwrap_or_else(|| EntityKind::default_for(content_type)))
}

fn scoped_query(term: String, scope: Scope) -> SearchQuery {
    let mut query = SearchQuery::new(term);
    query.username = scope.user;
    query.indexid = scope.package;
    query.search_on = scope.search_on;
    query
}

fn read_documents(path: &Path, content_type: ContentType) -> Result<Vec<IndexedDocument>> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))?;

    let items = match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };

    items
        .into_iter()
        .map(|mut item| {
            // the command line type wins over whatever the file says
            if let Some(obj) = item.as_object_mut() {
                obj.insert("type".to_string(), serde_json::to_value(content_type)?);
            }
            serde_json::from_value(item).context("Invalid document")
        })
        .collect()
}

fn handle_daemon_command(action: DaemonAction, config: AppConfig) -> Result<()> {
    match action {
        DaemonAction::Start => {
            if is_daemon_running() {
                println!("Daemon is already running");
                return Ok(());
            }

            println!("Starting fedsearch daemon...");
            server::daemon::daemonize(config)?;

            // Wait a moment for daemon to start
            std::thread::sleep(std::time::Duration::from_millis(500));

            if is_daemon_running() {
                println!("Daemon started (socket: {})", get_socket_path().display());
            } else {
                println!(
                    "Daemon may have failed to start. Check {}",
                    server::get_pid_path().with_extension("err").display()
                );
            }
        }

        DaemonAction::Stop => {
            if !is_daemon_running() {
                println!("Daemon is not running");
                return Ok(());
            }

            println!("Stopping daemon...");

            // Try graceful shutdown via client first
            if let Some(mut client) = IndexClient::connect() {
                let _ = client.shutdown();
                std::thread::sleep(std::time::Duration::from_millis(500));
            }

            // Force stop if still running
            if is_daemon_running() {
                server::daemon::stop_daemon()?;
            }

            println!("Daemon stopped");
        }

        DaemonAction::Status => {
            if !is_daemon_running() {
                println!("Daemon is not running");
                return Ok(());
            }

            match IndexClient::connect() {
                Some(mut client) => match client.status() {
                    Ok(status) => {
                        println!("fedsearch daemon status:");
                        println!("  Uptime: {}s", status.uptime_secs);
                        println!("  Indices: {}", status.indices);
                        println!("  Open readers: {}", status.engine.open_readers);
                        println!("  Queries served: {}", status.queries_served);
                        println!("  Query cache hit rate: {:.1}%", status.cache_hit_rate * 100.0);
                        println!("  Pending operations: {}", status.pending_operations);
                        println!("  Documents indexed: {}", status.engine.documents_indexed);
                        println!("  Documents deleted: {}", status.engine.documents_deleted);
                    }
                    Err(e) => {
                        println!("Failed to get status: {}", e);
                    }
                },
                None => {
                    println!("Daemon is running but not responding");
                }
            }
        }

        DaemonAction::Foreground => {
            if is_daemon_running() {
                println!("Daemon is already running in background. Stop it first with 'fedsearch daemon stop'");
                return Ok(());
            }

            println!("Running daemon in foreground (Ctrl+C to stop)...");
            server::daemon::run_foreground(config)?;
        }
    }

    Ok(())
}
