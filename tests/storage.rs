//! Storage behavior seen through the engine: writer locking, segment merging
//! and on-disk layout.

use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

use fedsearch::SearchError;
use fedsearch::content::{ContentType, EntityKind, IndexOwner, IndexedDocument};
use fedsearch::engine::SearchEngine;
use fedsearch::index::{IndexStorage, LockPolicy, MergePolicy, index_name};
use fedsearch::query::SearchQuery;
use fedsearch::utils::AppConfig;

fn alice() -> IndexOwner {
    IndexOwner::new("alice", EntityKind::User)
}

fn config(tmp: &TempDir) -> AppConfig {
    let mut config = AppConfig::with_data_dir(tmp.path());
    config.max_searchers = 2;
    config.lock_max_attempts = 3;
    config.lock_min_delay_ms = 5;
    config.lock_max_delay_ms = 10;
    config
}

#[test]
fn held_writer_makes_engine_writes_time_out() {
    let tmp = TempDir::new().unwrap();
    let engine = SearchEngine::new(tmp.path(), config(&tmp)).unwrap();
    engine
        .index(&alice(), IndexedDocument::new("n1", ContentType::Note, "fire"))
        .unwrap();

    let storage = IndexStorage::new(tmp.path()).with_lock_policy(LockPolicy::new(1, 1, 1));
    let handle = storage.open_or_create(&alice(), ContentType::Note).unwrap();
    let held = storage.writer(&handle).unwrap();

    let err = engine
        .index(&alice(), IndexedDocument::new("n2", ContentType::Note, "ice"))
        .unwrap_err();
    match err {
        SearchError::LockTimeout { index, attempts } => {
            assert_eq!(index, handle.name);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected lock timeout, got {other:?}"),
    }

    // readers are never blocked by a writer
    let query = SearchQuery::new("fire").with_username("alice");
    assert_eq!(engine.search(&query).len(), 1);

    held.cancel();
    engine
        .index(&alice(), IndexedDocument::new("n2", ContentType::Note, "ice"))
        .unwrap();
}

/// Patient lock policy so a crowd of writers queues instead of timing out
fn crowded_config(tmp: &TempDir) -> AppConfig {
    let mut config = config(tmp);
    config.lock_max_attempts = 2000;
    config.lock_min_delay_ms = 1;
    config.lock_max_delay_ms = 5;
    config
}

/// Run `writers` threads that start together and each index one note
fn index_concurrently(engine: &Arc<SearchEngine>, writers: usize, offset: usize) {
    let barrier = Arc::new(Barrier::new(writers));
    let threads: Vec<_> = (0..writers)
        .map(|i| {
            let engine = Arc::clone(engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let doc = IndexedDocument::new(format!("n{}", offset + i), ContentType::Note, "fire");
                engine.index(&alice(), doc)
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap().unwrap();
    }
}

#[test]
fn concurrent_first_writes_share_one_index() {
    let tmp = TempDir::new().unwrap();
    let engine = Arc::new(SearchEngine::new(tmp.path(), crowded_config(&tmp)).unwrap());

    index_concurrently(&engine, 16, 0);

    let name = index_name("alice", ContentType::Note);
    assert_eq!(engine.index_stats(&name).unwrap().live_docs, 16);
    let query = SearchQuery::new("fire").with_username("alice");
    assert_eq!(engine.search(&query).total_count, 16);

    // no temporary manifests are left next to the published one
    let dir = engine.storage().index_dir(&name);
    let leftovers: Vec<_> = std::fs::read_dir(&dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|f| f.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn concurrent_writes_to_existing_index_all_land() {
    let tmp = TempDir::new().unwrap();
    let engine = Arc::new(SearchEngine::new(tmp.path(), crowded_config(&tmp)).unwrap());
    engine
        .index(&alice(), IndexedDocument::new("seed", ContentType::Note, "fire"))
        .unwrap();

    index_concurrently(&engine, 12, 100);
    index_concurrently(&engine, 12, 200);

    let name = index_name("alice", ContentType::Note);
    let stats = engine.index_stats(&name).unwrap();
    assert_eq!(stats.live_docs, 25);
    assert_eq!(stats.deleted_docs, 0);
    let query = SearchQuery::new("fire").with_username("alice");
    assert_eq!(engine.search(&query).total_count, 25);
}

#[test]
fn segment_count_stays_bounded() {
    let tmp = TempDir::new().unwrap();
    let mut config = config(&tmp);
    config.max_segments = 3;
    config.merge_segments = 2;
    let engine = SearchEngine::new(tmp.path(), config).unwrap();

    for i in 0..12 {
        let doc = IndexedDocument::new(format!("n{i}"), ContentType::Note, format!("fire {i}"));
        engine.index(&alice(), doc).unwrap();
    }

    let name = index_name("alice", ContentType::Note);
    let stats = engine.index_stats(&name).unwrap();
    assert!(stats.segments <= 3, "{} segments", stats.segments);
    assert_eq!(stats.live_docs, 12);

    let query = SearchQuery::new("fire").with_username("alice");
    let results = engine.search(&query);
    assert_eq!(results.total_count, 12);
}

#[test]
fn updates_leave_deletions_until_optimized() {
    let tmp = TempDir::new().unwrap();
    let engine = SearchEngine::new(tmp.path(), config(&tmp)).unwrap();
    engine
        .index(&alice(), IndexedDocument::new("n1", ContentType::Note, "fire"))
        .unwrap();
    engine
        .update(&alice(), IndexedDocument::new("n1", ContentType::Note, "ice"))
        .unwrap();

    let name = index_name("alice", ContentType::Note);
    let before = engine.index_stats(&name).unwrap();
    assert_eq!(before.live_docs, 1);
    assert_eq!(before.deleted_docs, 1);

    engine.optimize(&name).unwrap();
    let after = engine.index_stats(&name).unwrap();
    assert_eq!(after.segments, 1);
    assert_eq!(after.deleted_docs, 0);
    assert_eq!(after.live_docs, 1);
}

#[test]
fn indices_land_in_hashed_directories() {
    let tmp = TempDir::new().unwrap();
    let engine = SearchEngine::new(tmp.path(), config(&tmp)).unwrap();
    engine
        .index(&alice(), IndexedDocument::new("n1", ContentType::Note, "fire"))
        .unwrap();

    let name = index_name("alice", ContentType::Note);
    assert!(name.starts_with("note_"));
    let dir = engine.storage().index_dir(&name);
    assert!(dir.join("meta.json").is_file());

    let rel: Vec<String> = dir
        .strip_prefix(tmp.path())
        .unwrap()
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    assert_eq!(rel.len(), 4);
    assert!(rel[1].starts_with("0x") && rel[2].starts_with("0x"));

    let listed = engine.storage().list_indices().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].owner, alice());
}

#[test]
fn merge_policy_from_config() {
    let tmp = TempDir::new().unwrap();
    let mut config = config(&tmp);
    config.max_segments = 4;
    config.merge_segments = 3;
    let storage = IndexStorage::with_config(tmp.path(), &config);
    assert_eq!(storage.merge_policy(), MergePolicy::new(4, 3));
}
