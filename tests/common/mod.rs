//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use std::sync::Arc;
use tagtree::{
    config::PrefStore,
    properties::{FieldKind, FieldMeta},
    source::MemorySource,
};

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times; subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// A small library over `prefs`: four books with authors, dotted tags, a series and ratings,
/// plus one saved search.
#[allow(dead_code)]
pub fn library(prefs: Arc<dyn PrefStore>) -> Arc<MemorySource> {
    let source = MemorySource::new(prefs)
        .with_field(FieldMeta::new("authors", "Authors", FieldKind::Text).names())
        .with_field(FieldMeta::new("series", "Series", FieldKind::Series))
        .with_field(FieldMeta::new("tags", "Tags", FieldKind::Text))
        .with_field(FieldMeta::new("search", "Saved searches", FieldKind::Text));
    source.add_book(
        1,
        &[("authors", &["Tolkien"]), ("tags", &["Fiction", "Fiction.Fantasy"])],
        Some(10),
    );
    source.add_book(
        2,
        &[
            ("authors", &["Herbert"]),
            ("tags", &["Fiction.SF"]),
            ("series", &["Dune"]),
        ],
        Some(8),
    );
    source.add_book(3, &[("authors", &["Asimov"]), ("tags", &["Fiction.SF.Robots"])], Some(6));
    source.add_book(4, &[("authors", &["Adams"]), ("tags", &["Humour"])], None);
    source.add_saved_search("Unread", "tags:=unread");
    Arc::new(source)
}

/// A generated library of `books` records spread over `authors` authors and a three level tag
/// hierarchy.
#[allow(dead_code)]
pub fn large_library(prefs: Arc<dyn PrefStore>, books: u64, authors: u64) -> Arc<MemorySource> {
    let source = MemorySource::new(prefs)
        .with_field(FieldMeta::new("authors", "Authors", FieldKind::Text).names())
        .with_field(FieldMeta::new("tags", "Tags", FieldKind::Text));
    for id in 1..=books {
        let author = format!("Author {:04}", id % authors.max(1));
        let tag = format!("Genre{}.Sub{}.Topic{}", id % 7, id % 5, id % 3);
        source.add_book(
            id,
            &[("authors", &[author.as_str()]), ("tags", &[tag.as_str()])],
            Some((id % 11) as u8),
        );
    }
    Arc::new(source)
}
