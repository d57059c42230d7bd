//! Performance benchmarks for tag tree construction
//!
//! Measures full rebuilds of a generated library:
//! - Flat categories collapsed into first-letter buckets
//! - Hierarchical tags with aggregate counts and ratings
//! - Search token composition over a marked tree
//!
//! Run with: cargo bench

use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::sync::Arc;
use tagtree::{
    config::{MemoryPrefStore, PrefStore, PREF_HIERARCHICAL},
    event::EventSink,
    model::TagsModel,
    properties::{FieldKind, FieldMeta},
    source::MemorySource,
};

fn library(prefs: Arc<dyn PrefStore>, books: u64) -> Arc<MemorySource> {
    let source = MemorySource::new(prefs)
        .with_field(FieldMeta::new("authors", "Authors", FieldKind::Text).names())
        .with_field(FieldMeta::new("series", "Series", FieldKind::Series))
        .with_field(FieldMeta::new("tags", "Tags", FieldKind::Text));
    let letters = ['A', 'B', 'C', 'D', 'K', 'M', 'S', 'T', 'W', 'Z'];
    for id in 1..=books {
        let author = format!("{}uthor {id:05}", letters[(id % 10) as usize]);
        let series = format!("Series {}", id % 97);
        let tag = format!("Genre{}.Sub{}.Topic{}", id % 13, id % 7, id % 5);
        source.add_book(
            id,
            &[
                ("authors", &[author.as_str()]),
                ("series", &[series.as_str()]),
                ("tags", &[tag.as_str(), "Shelf"]),
            ],
            Some((id % 11) as u8),
        );
    }
    Arc::new(source)
}

fn model(hierarchical: bool, books: u64) -> TagsModel {
    let mut prefs = MemoryPrefStore::new();
    if hierarchical {
        prefs = prefs.with(PREF_HIERARCHICAL, json!(["tags"]));
    }
    let prefs: Arc<dyn PrefStore> = Arc::new(prefs);
    TagsModel::new(library(prefs.clone(), books), prefs, EventSink::default())
}

// Benchmark: rebuild with first-letter collapsing of large flat categories
fn bench_rebuild_flat(c: &mut Criterion) {
    let model = model(false, 5_000);
    c.bench_function("rebuild_flat_5000", |b| {
        b.iter(|| model.rebuild().unwrap().len());
    });
}

// Benchmark: rebuild with hierarchical tags and aggregates
fn bench_rebuild_hierarchical(c: &mut Criterion) {
    let model = model(true, 5_000);
    c.bench_function("rebuild_hierarchical_5000", |b| {
        b.iter(|| {
            model.rebuild().unwrap();
            let tree = model.tree();
            tree.top_level_categories()
                .iter()
                .map(|c| tree.item_count(*c))
                .sum::<usize>()
        });
    });
}

// Benchmark: token composition with every bucket of every category marked
fn bench_compose_tokens(c: &mut Criterion) {
    let model = model(false, 5_000);
    model.rebuild().unwrap();
    for category in 0..3 {
        let mut row = 0;
        loop {
            let path = vec![category, row];
            if model.named_path(&path).is_none() || !model.toggle(&path, false, None) {
                break;
            }
            row += 1;
        }
    }
    c.bench_function("compose_tokens", |b| {
        b.iter(|| model.tokens().len());
    });
}

criterion_group!(
    benches,
    bench_rebuild_flat,
    bench_rebuild_hierarchical,
    bench_compose_tokens
);
criterion_main!(benches);
