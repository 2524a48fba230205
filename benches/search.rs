//! Performance benchmarks for fedsearch
//!
//! Run with: cargo bench

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use tempfile::TempDir;

use fedsearch::content::{ContentType, EntityKind, IndexOwner, IndexedDocument};
use fedsearch::engine::SearchEngine;
use fedsearch::highlight::{HighlightOptions, highlight};
use fedsearch::query::{SearchQuery, parse_query};
use fedsearch::suggest::{SuggestOptions, suggest};
use fedsearch::utils::{AppConfig, HighlightConfig};

const WORDS: &[&str] = &[
    "shield", "waves", "rise", "become", "fire", "ice", "multiplication", "subtraction", "rage",
    "rankle", "rain", "raise", "fraction", "equation", "variable", "integer", "ratio", "angle",
];

fn sentence(i: usize) -> String {
    (0..12)
        .map(|j| WORDS[(i * 7 + j * 3) % WORDS.len()])
        .collect::<Vec<_>>()
        .join(" ")
}

/// An engine with notes for a user and sections for one package
fn create_benchmark_engine() -> (TempDir, SearchEngine) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = SearchEngine::new(temp_dir.path(), AppConfig::with_data_dir(temp_dir.path()))
        .expect("Failed to open engine");

    let alice = IndexOwner::new("alice", EntityKind::User);
    let notes = (0..500)
        .map(|i| IndexedDocument::new(format!("note-{i}"), ContentType::Note, sentence(i)))
        .collect();
    engine
        .index_batch(&alice, ContentType::Note, notes)
        .expect("Failed to index notes");

    let book = IndexOwner::new("prealgebra", EntityKind::Book);
    let sections = (0..200)
        .map(|i| {
            IndexedDocument::new(format!("sec-{i}"), ContentType::Book, sentence(i * 13).repeat(4))
                .with_ntiid(format!("tag:prealgebra.sec{i}"))
        })
        .collect();
    engine
        .index_batch(&book, ContentType::Book, sections)
        .expect("Failed to index book");

    (temp_dir, engine)
}

fn bench_query_parsing(c: &mut Criterion) {
    let schema = ContentType::Note.schema();
    let terms = ["shield", "shi*", "\"fire and ice\"", "rage -rain", "multiplication subtraction"];

    let mut group = c.benchmark_group("query_parsing");
    for term in terms {
        let query = SearchQuery::new(term);
        group.bench_with_input(BenchmarkId::from_parameter(term), &query, |b, q| {
            b.iter(|| parse_query(black_box(q), &schema))
        });
    }
    group.finish();
}

fn bench_highlight(c: &mut Criterion) {
    let text = sentence(3).repeat(40);
    let terms = vec!["fire".to_string(), "ice".to_string()];
    let options = HighlightOptions::from_config(&HighlightConfig::default());
    let phrase = options.with_phrase(true);

    let mut group = c.benchmark_group("highlight");
    group.bench_function("terms", |b| {
        b.iter(|| highlight(black_box(&text), &terms, &options))
    });
    group.bench_function("phrase", |b| {
        b.iter(|| highlight(black_box(&text), &terms, &phrase))
    });
    group.finish();
}

fn bench_suggest(c: &mut Criterion) {
    let vocabulary: Vec<String> = (0..5000)
        .map(|i| format!("{}{}", WORDS[i % WORDS.len()], i))
        .chain(WORDS.iter().map(|w| w.to_string()))
        .collect();
    let options = SuggestOptions { maxdist: 2, prefix: 2 };

    c.bench_function("suggest_vocabulary", |b| {
        b.iter(|| suggest(vocabulary.iter().map(String::as_str), black_box("rankl"), options))
    });
}

fn bench_search(c: &mut Criterion) {
    let (_temp_dir, engine) = create_benchmark_engine();

    let mut group = c.benchmark_group("search");

    group.bench_function("single_word", |b| {
        let query = SearchQuery::new("shield").with_username("alice");
        b.iter(|| engine.search(black_box(&query)))
    });

    group.bench_function("phrase", |b| {
        let query = SearchQuery::new("\"fire ice\"").with_username("alice");
        b.iter(|| engine.search(black_box(&query)))
    });

    group.bench_function("federated", |b| {
        let query = SearchQuery::new("ratio").with_username("alice").with_package("prealgebra");
        b.iter(|| engine.search(black_box(&query)))
    });

    group.bench_function("suggest_and_search", |b| {
        let query = SearchQuery::new("shild").with_username("alice");
        b.iter(|| engine.suggest_and_search(black_box(&query)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_query_parsing,
    bench_highlight,
    bench_suggest,
    bench_search,
);

criterion_main!(benches);
