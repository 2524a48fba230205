//! Federated search coordinator.
//!
//! [`SearchEngine`] owns the index storage, a bounded cache of open
//! readers and a fixed-size `rayon` pool. A request resolves to a set of
//! index legs, every leg is searched on the pool, and the per-leg results
//! are merged, sorted and paged into one [`SearchResults`].

pub mod cache;
pub mod directory;
pub mod legs;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::content::{ContentResolver, ContentType, IndexOwner, IndexedDocument};
use crate::error::{Result, SearchError};
use crate::highlight::{HighlightOptions, highlight};
use crate::index::{CommitStats, IndexStats, IndexStorage};
use crate::pipeline::{IndexApplier, OperationKind, QueuedOperation};
use crate::query::{SearchQuery, Searcher, parse_query};
use crate::results::{ContainerPaths, FlatPaths, SearchHit, SearchResults, SortContext, SuggestResults};
use crate::suggest::{SuggestOptions, suggest};
use crate::utils::AppConfig;

pub use cache::{CachedReader, ReaderCache};
pub use directory::{EntityDirectory, MemoryDirectory, NoDirectory, normalize_names};
pub use legs::{Leg, resolve_legs};

/// Counters since the engine was created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub searches: u64,
    pub suggests: u64,
    pub legs_dispatched: u64,
    pub documents_indexed: u64,
    pub documents_deleted: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub open_readers: usize,
}

#[derive(Default)]
struct Counters {
    searches: AtomicU64,
    suggests: AtomicU64,
    legs_dispatched: AtomicU64,
    documents_indexed: AtomicU64,
    documents_deleted: AtomicU64,
}

/// The search service: one per data root, shared by reference or `Arc`
pub struct SearchEngine {
    config: AppConfig,
    storage: IndexStorage,
    readers: ReaderCache,
    directory: Arc<dyn EntityDirectory>,
    paths: Arc<dyn ContainerPaths>,
    pool: ThreadPool,
    counters: Counters,
}

impl SearchEngine {
    pub fn new(root: impl Into<PathBuf>, config: AppConfig) -> Result<Self> {
        let root = root.into();
        let storage = IndexStorage::with_config(&root, &config);
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.effective_max_searchers())
            .thread_name(|i| format!("fedsearch-leg-{}", i))
            .build()
            .map_err(|e| SearchError::Io(io::Error::other(e)))?;

        info!(
            root = %root.display(),
            searchers = config.effective_max_searchers(),
            max_open_readers = config.max_open_readers,
            "search engine ready"
        );

        Ok(Self {
            readers: ReaderCache::new(config.max_open_readers),
            storage,
            directory: Arc::new(NoDirectory),
            paths: Arc::new(FlatPaths),
            pool,
            counters: Counters::default(),
            config,
        })
    }

    pub fn with_directory(mut self, directory: Arc<dyn EntityDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_paths(mut self, paths: Arc<dyn ContainerPaths>) -> Self {
        self.paths = paths;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn storage(&self) -> &IndexStorage {
        &self.storage
    }

    // ---- writes ----

    /// Index a document into the owner's index, replacing any earlier version
    pub fn index(&self, owner: &IndexOwner, doc: IndexedDocument) -> Result<CommitStats> {
        self.index_batch(owner, doc.content_type, vec![doc])
    }

    /// Upsert many documents of one type in a single commit
    pub fn index_batch(
        &self,
        owner: &IndexOwner,
        content_type: ContentType,
        docs: Vec<IndexedDocument>,
    ) -> Result<CommitStats> {
        let handle = self.storage.open_or_create(owner, content_type)?;
        let mut writer = self.storage.writer(&handle)?;
        let count = docs.len();
        for mut doc in docs {
            doc.content_type = content_type;
            writer.update_document(doc);
        }
        let stats = writer.commit()?;
        self.readers.invalidate(&handle.name);
        self.counters
            .documents_indexed
            .fetch_add(count as u64, Ordering::Relaxed);
        debug!(index = %handle.name, docs = count, generation = stats.generation, "indexed");
        Ok(stats)
    }

    /// Index any domain object through its resolver
    pub fn index_object<R: ContentResolver + ?Sized>(&self, owner: &IndexOwner, object: &R) -> Result<CommitStats> {
        self.index(owner, object.to_document())
    }

    /// Same as [`index`](Self::index); adds are upserts
    pub fn update(&self, owner: &IndexOwner, doc: IndexedDocument) -> Result<CommitStats> {
        self.index(owner, doc)
    }

    /// Remove a document by oid. Returns whether it was present.
    pub fn delete(&self, owner: &IndexOwner, content_type: ContentType, oid: &str) -> Result<bool> {
        let name = crate::index::index_name(&owner.entity, content_type);
        let handle = match self.storage.open_index(&name) {
            Ok(handle) => handle,
            Err(SearchError::IndexMissing(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        let unique = handle.schema.unique_field().to_string();
        let present = !self
            .readers
            .get(&handle)?
            .reader()
            .find_by_term(&unique, oid)?
            .is_empty();
        if !present {
            return Ok(false);
        }

        let mut writer = self.storage.writer(&handle)?;
        writer.delete_by_term(&unique, oid);
        writer.commit()?;
        self.readers.invalidate(&handle.name);
        self.counters.documents_deleted.fetch_add(1, Ordering::Relaxed);
        debug!(index = %handle.name, oid, "deleted");
        Ok(true)
    }

    /// Merge every segment of an index into one
    pub fn optimize(&self, name: &str) -> Result<CommitStats> {
        let handle = self.storage.open_index(name)?;
        let stats = self.storage.writer(&handle)?.optimize()?;
        self.readers.invalidate(name);
        info!(index = name, segments = stats.segments, "optimized");
        Ok(stats)
    }

    pub fn index_stats(&self, name: &str) -> Result<IndexStats> {
        IndexStats::collect(&self.storage.open_index(name)?)
    }

    // ---- reads ----

    /// Legs a request would fan out to
    pub fn legs(&self, query: &SearchQuery) -> Vec<Leg> {
        resolve_legs(query, self.directory.as_ref())
    }

    /// Federated search across every leg of the request.
    ///
    /// Never fails: a leg that errors contributes nothing.
    pub fn search(&self, query: &SearchQuery) -> SearchResults {
        let query = query.clone().normalized();
        self.counters.searches.fetch_add(1, Ordering::Relaxed);
        if query.is_empty() {
            return SearchResults::empty(&query.term);
        }

        let legs = self.legs(&query);
        self.counters
            .legs_dispatched
            .fetch_add(legs.len() as u64, Ordering::Relaxed);

        let per_leg: Vec<SearchResults> = self.pool.install(|| {
            legs.par_iter()
                .map(|leg| match self.search_leg(leg, &query) {
                    Ok(results) => results,
                    Err(e) if e.is_index_missing() => SearchResults::empty(&query.term),
                    Err(e) => {
                        warn!(index = %leg.name, error = %e, "search leg failed");
                        SearchResults::empty(&query.term)
                    }
                })
                .collect()
        });

        let mut results = SearchResults::merge_all(&query.term, per_leg);
        let ctx = SortContext::new(&query, self.paths.as_ref(), &self.config.relevance);
        results.sort(&ctx);
        results.truncate(query.limit);
        results.batch(query.batch_start, query.batch_size);

        debug!(
            term = %query.term,
            legs = legs.len(),
            total = results.total_count,
            returned = results.len(),
            "search complete"
        );
        results
    }

    fn search_leg(&self, leg: &Leg, query: &SearchQuery) -> Result<SearchResults> {
        let handle = self.storage.open_index(&leg.name)?;
        let cached = self.readers.get(&handle)?;
        let reader = cached.reader();

        let parsed = parse_query(query, reader.schema());
        let outcome = Searcher::new(reader, &parsed).search(&parsed, query)?;

        let options = HighlightOptions::from_config(&self.config.highlight)
            .with_limits(query.maxchars, query.surround)
            .with_phrase(parsed.phrase)
            .with_prefix(parsed.prefix);

        let hits: Vec<SearchHit> = outcome
            .hits
            .into_iter()
            .map(|raw| {
                let lit = highlight(&raw.doc.content, &parsed.highlight_terms, &options);
                SearchHit::new(raw.doc, raw.score, lit)
            })
            .collect();

        Ok(SearchResults::from_hits(&query.term, hits, outcome.total))
    }

    /// Edit-distance suggestions from the vocabulary of every leg
    pub fn suggest(&self, query: &SearchQuery) -> SuggestResults {
        let query = query.clone().normalized();
        self.counters.suggests.fetch_add(1, Ordering::Relaxed);
        if query.is_empty() {
            return SuggestResults::new(&query.term, Vec::new());
        }

        let legs = self.legs(&query);
        self.counters
            .legs_dispatched
            .fetch_add(legs.len() as u64, Ordering::Relaxed);
        let options = SuggestOptions::from_query(&query, self.config.word_max_dist);

        let per_leg: Vec<SuggestResults> = self.pool.install(|| {
            legs.par_iter()
                .map(|leg| {
                    let words = self
                        .storage
                        .open_index(&leg.name)
                        .and_then(|handle| self.readers.get(&handle))
                        .map(|cached| {
                            suggest(cached.vocabulary().iter().map(String::as_str), &query.term, options)
                        });
                    match words {
                        Ok(words) => SuggestResults::new(&query.term, words),
                        Err(e) => {
                            if !e.is_index_missing() {
                                warn!(index = %leg.name, error = %e, "suggest leg failed");
                            }
                            SuggestResults::new(&query.term, Vec::new())
                        }
                    }
                })
                .collect()
        });

        per_leg
            .into_iter()
            .fold(SuggestResults::new(&query.term, Vec::new()), SuggestResults::merge)
    }

    /// Search the best suggestion for a single plain word, else the term itself
    pub fn suggest_and_search(&self, query: &SearchQuery) -> SearchResults {
        let direct = !query.is_single_word() || query.is_phrase_search() || query.is_prefix_search();
        if direct || query.is_empty() {
            return self.search(query);
        }

        let suggestions = self.suggest(query);
        let Some(best) = suggestions.suggestions.first() else {
            return self.search(query);
        };

        debug!(term = %query.term, suggestion = %best, "searching suggestion");
        let mut results = self.search(&query.retargeted(best.clone()));
        results.suggestions = suggestions.suggestions;
        results
    }

    pub fn stats(&self) -> EngineStats {
        let (cache_hits, cache_misses) = self.readers.counters();
        EngineStats {
            searches: self.counters.searches.load(Ordering::Relaxed),
            suggests: self.counters.suggests.load(Ordering::Relaxed),
            legs_dispatched: self.counters.legs_dispatched.load(Ordering::Relaxed),
            documents_indexed: self.counters.documents_indexed.load(Ordering::Relaxed),
            documents_deleted: self.counters.documents_deleted.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
            open_readers: self.readers.len(),
        }
    }
}

impl IndexApplier for SearchEngine {
    fn apply(&self, op: &QueuedOperation, doc: Option<IndexedDocument>) -> Result<()> {
        let owner = op.owner();
        match (op.kind, doc) {
            (OperationKind::Add | OperationKind::Update, Some(doc)) => {
                self.index(&owner, doc)?;
            }
            (OperationKind::Add | OperationKind::Update, None) => {}
            (OperationKind::Delete, _) => {
                self.delete(&owner, op.content_type, &op.docid)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::EntityKind;
    use crate::query::SortOn;
    use tempfile::TempDir;

    fn engine(tmp: &TempDir) -> SearchEngine {
        let mut config = AppConfig::with_data_dir(tmp.path());
        config.max_searchers = 4;
        SearchEngine::new(tmp.path(), config).unwrap()
    }

    fn alice() -> IndexOwner {
        IndexOwner::new("alice", EntityKind::User)
    }

    fn note(oid: &str, text: &str) -> IndexedDocument {
        IndexedDocument::new(oid, ContentType::Note, text)
    }

    fn query(term: &str) -> SearchQuery {
        SearchQuery::new(term).with_username("alice")
    }

    #[test]
    fn test_index_and_search() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp);
        engine.index(&alice(), note("n1", "All Waves, Rise now and Become my Shield")).unwrap();
        engine.index(&alice(), note("n2", "Multiplication and subtraction of fire and ice")).unwrap();

        let results = engine.search(&query("shield"));
        assert_eq!(results.len(), 1);
        assert_eq!(results.hits[0].oid, "n1");
        assert!(results.hits[0].snippet.contains("Shield"));
    }

    #[test]
    fn test_index_is_upsert() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp);
        engine.index(&alice(), note("n1", "fire")).unwrap();
        engine.update(&alice(), note("n1", "ice")).unwrap();

        assert!(engine.search(&query("fire")).is_empty());
        assert_eq!(engine.search(&query("ice")).len(), 1);
    }

    struct Card {
        id: &'static str,
        title: &'static str,
    }

    impl ContentResolver for Card {
        fn oid(&self) -> String {
            self.id.to_string()
        }

        fn content_type(&self) -> ContentType {
            ContentType::NtiCard
        }

        fn content(&self) -> String {
            self.title.to_string()
        }
    }

    #[test]
    fn test_index_object() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp);
        let book = IndexOwner::new("prealgebra", EntityKind::Book);
        engine
            .index_object(&book, &Card { id: "c1", title: "Fractions explained" })
            .unwrap();

        let results = engine.search(&SearchQuery::new("fractions").with_package("prealgebra"));
        assert_eq!(results.len(), 1);
        assert_eq!(results.hits[0].content_type, ContentType::NtiCard);
    }

    #[test]
    fn test_delete() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp);
        assert!(!engine.delete(&alice(), ContentType::Note, "n1").unwrap());

        engine.index(&alice(), note("n1", "fire")).unwrap();
        assert!(engine.delete(&alice(), ContentType::Note, "n1").unwrap());
        assert!(!engine.delete(&alice(), ContentType::Note, "n1").unwrap());
        assert!(engine.search(&query("fire")).is_empty());
        assert_eq!(engine.stats().documents_deleted, 1);
    }

    #[test]
    fn test_empty_term_dispatches_nothing() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp);
        engine.index(&alice(), note("n1", "fire")).unwrap();

        let results = engine.search(&query("   "));
        assert!(results.is_empty());
        assert_eq!(results.total_count, 0);
        let stats = engine.stats();
        assert_eq!(stats.searches, 1);
        assert_eq!(stats.legs_dispatched, 0);
        assert_eq!(stats.cache_hits + stats.cache_misses, 0);
    }

    #[test]
    fn test_federates_over_groups() {
        let tmp = TempDir::new().unwrap();
        let directory = Arc::new(MemoryDirectory::new());
        directory.add_group("alice", "class-a");
        let engine = engine(&tmp).with_directory(directory);

        engine.index(&alice(), note("n1", "fire and ice")).unwrap();
        engine
            .index(
                &IndexOwner::new("class-a", EntityKind::DynamicGroup),
                note("n2", "ice cream").with_container("tag:lesson1"),
            )
            .unwrap();
        engine
            .index(&IndexOwner::new("bob", EntityKind::User), note("n3", "ice age"))
            .unwrap();

        let results = engine.search(&query("ice"));
        let mut oids: Vec<&str> = results.hits.iter().map(|h| h.oid.as_str()).collect();
        oids.sort();
        assert_eq!(oids, vec!["n1", "n2"]);
        assert_eq!(results.container_counts.get("tag:lesson1"), Some(&1));
    }

    #[test]
    fn test_batching_keeps_total() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp);
        let docs = (0..5)
            .map(|i| note(&format!("n{}", i), "fire").with_last_modified(i as f64))
            .collect();
        engine.index_batch(&alice(), ContentType::Note, docs).unwrap();

        let mut q = query("fire").with_sort(SortOn::LastModified).with_batch(1, 2);
        q.sort_descending = Some(true);
        let results = engine.search(&q);
        assert_eq!(results.total_count, 5);
        let oids: Vec<&str> = results.hits.iter().map(|h| h.oid.as_str()).collect();
        assert_eq!(oids, vec!["n3", "n2"]);
    }

    #[test]
    fn test_suggest_and_search() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp);
        engine.index(&alice(), note("n1", "rage rankle blue")).unwrap();

        let mut q = query("rankl");
        q.maxdist = Some(2);
        q.prefix = Some(2);
        let suggestions = engine.suggest(&q);
        assert_eq!(suggestions.suggestions.first().map(String::as_str), Some("rankle"));

        let results = engine.suggest_and_search(&q);
        assert_eq!(results.len(), 1);
        assert_eq!(results.term, "rankle");
        assert_eq!(results.suggestions, suggestions.suggestions);
    }

    #[test]
    fn test_phrase_skips_suggest() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp);
        engine.index(&alice(), note("n1", "fire and ice")).unwrap();

        let results = engine.suggest_and_search(&query("\"fire and\""));
        assert!(results.suggestions.is_empty());
        assert_eq!(engine.stats().suggests, 0);
    }

    #[test]
    fn test_apply_queued_operations() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp);
        let add = QueuedOperation::new(OperationKind::Add, "n1", &alice(), ContentType::Note, 60);
        engine.apply(&add, Some(note("n1", "fire"))).unwrap();
        assert_eq!(engine.search(&query("fire")).len(), 1);

        let del = QueuedOperation::new(OperationKind::Delete, "n1", &alice(), ContentType::Note, 60);
        engine.apply(&del, None).unwrap();
        assert!(engine.search(&query("fire")).is_empty());
    }

    #[test]
    fn test_optimize_and_stats() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(&tmp);
        engine.index(&alice(), note("n1", "fire")).unwrap();
        engine.index(&alice(), note("n2", "ice")).unwrap();

        let name = crate::index::index_name("alice", ContentType::Note);
        assert_eq!(engine.index_stats(&name).unwrap().segments, 2);
        let stats = engine.optimize(&name).unwrap();
        assert_eq!(stats.segments, 1);
        assert_eq!(engine.index_stats(&name).unwrap().live_docs, 2);
    }
}
