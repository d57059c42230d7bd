//! Shared test utilities for tree and model tests

use crate::{
    config::MemoryPrefStore,
    event::{EventSink, TreeEvent},
    model::TagsModel,
    properties::{FieldKind, FieldMeta},
    source::MemorySource,
    tree::{NodeId, TagTree},
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// The field set of a small library: the standard categories plus one custom column.
pub fn library_fields() -> Vec<FieldMeta> {
    vec![
        FieldMeta::new("authors", "Authors", FieldKind::Text).names(),
        FieldMeta::new("series", "Series", FieldKind::Series),
        FieldMeta::new("tags", "Tags", FieldKind::Text),
        FieldMeta::new("rating", "Rating", FieldKind::Rating),
        FieldMeta::new("search", "Saved searches", FieldKind::Text),
        FieldMeta::new("#genre", "Genre", FieldKind::Text).custom(),
    ]
}

/// Preferences seeded with `prefs`, and an empty source over [library_fields].
pub fn empty_library(prefs: &[(&str, Value)]) -> (Arc<MemoryPrefStore>, Arc<MemorySource>) {
    let store = prefs
        .iter()
        .fold(MemoryPrefStore::new(), |store, (key, value)| {
            store.with(key, value.clone())
        });
    let store = Arc::new(store);
    let source = library_fields()
        .into_iter()
        .fold(MemorySource::new(store.clone()), |source, field| {
            source.with_field(field)
        });
    (store, Arc::new(source))
}

/// A handful of books exercising hierarchies, cross listings and ratings.
pub fn sample_library(prefs: &[(&str, Value)]) -> (Arc<MemoryPrefStore>, Arc<MemorySource>) {
    init_logging();
    let (store, source) = empty_library(prefs);
    source.add_book(
        1,
        &[
            ("authors", &["Tolkien"]),
            ("tags", &["Fiction", "Fiction.Fantasy"]),
            ("#genre", &["Epic"]),
        ],
        Some(10),
    );
    source.add_book(
        2,
        &[
            ("authors", &["Herbert"]),
            ("tags", &["Fiction.SF", "FictionLike"]),
            ("series", &["Dune"]),
        ],
        Some(8),
    );
    source.add_book(
        3,
        &[("authors", &["Asimov"]), ("tags", &["Fiction.SF.Robots"])],
        Some(6),
    );
    source.add_book(4, &[("authors", &["Adams"]), ("tags", &["Humour"])], None);
    source.add_saved_search("Unread", "tags:=unread");
    (store, source)
}

/// A model over `source` with an event receiver attached.
pub fn model_for(
    store: Arc<MemoryPrefStore>,
    source: Arc<MemorySource>,
) -> (TagsModel, UnboundedReceiver<TreeEvent>) {
    let (tx, rx) = unbounded_channel();
    let model = TagsModel::new(source, store, EventSink::new(Some(tx)));
    (model, rx)
}

/// Everything sent on `rx` so far.
pub fn drain(rx: &mut UnboundedReceiver<TreeEvent>) -> Vec<TreeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// First value node below top-level category `key` with `original_name`.
pub fn find_value(tree: &TagTree, key: &str, original_name: &str) -> Option<NodeId> {
    tree.top_level_categories()
        .iter()
        .filter(|c| tree.node(**c).category().map(|i| i.key.as_str()) == Some(key))
        .flat_map(|c| tree.child_values(*c))
        .find(|v| {
            tree.node(*v)
                .value()
                .map(|r| r.original_name == original_name)
                .unwrap_or(false)
        })
}

/// Display names of the children of `id`.
pub fn child_names(tree: &TagTree, id: NodeId) -> Vec<String> {
    tree.children(id)
        .iter()
        .map(|c| tree.node(*c).name().to_string())
        .collect()
}

/// Keys of the top-level categories.
pub fn top_level_keys(tree: &TagTree) -> Vec<String> {
    tree.top_level_categories()
        .iter()
        .filter_map(|c| tree.node(*c).category().map(|i| i.key.clone()))
        .collect()
}
