//! Preference storage and the typed tree configuration read from it.
//!
//! Preferences are opaque `key -> JSON value` pairs owned by whoever embeds the tree. This module
//! defines the [PrefStore] boundary, two stores ([MemoryPrefStore], [TomlPrefStore]) and
//! [TreeConfig], which reads every setting the builder needs and falls back to a documented
//! default (plus a [BuildDiagnostic]) when a stored value doesn't parse.

use crate::{
    diagnostic::BuildDiagnostic,
    error::TagTreeError,
    properties::{SortOrder, TagState},
};
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet},
    convert::TryFrom,
    fs::{read_to_string, write},
    path::PathBuf,
};

pub const PREF_SORT_BY: &str = "sort_tags_by";
pub const PREF_COLLAPSE_AT: &str = "tags_browser_collapse_at";
pub const PREF_PARTITION_METHOD: &str = "tags_browser_partition_method";
pub const PREF_COLLAPSE_FL_AT: &str = "tags_browser_collapse_fl_at";
pub const PREF_DONT_COLLAPSE: &str = "tag_browser_dont_collapse";
pub const PREF_HIDE_EMPTY: &str = "tag_browser_hide_empty_categories";
pub const PREF_HIDDEN_CATEGORIES: &str = "tag_browser_hidden_categories";
pub const PREF_CATEGORY_ORDER: &str = "tag_browser_category_order";
pub const PREF_HIERARCHICAL: &str = "categories_using_hierarchy";
pub const PREF_SEARCH_ORDER: &str = "tb_search_order";
pub const PREF_USER_CATEGORIES: &str = "user_categories";
pub const PREF_GROUPED_SEARCH_TERMS: &str = "grouped_search_terms";
pub const PREF_CATEGORY_ICONS: &str = "tags_browser_category_icons";
pub const PREF_VALUE_ICONS: &str = "tags_browser_value_icons";
pub const PREF_NAME_TEMPLATE: &str = "categories_collapsed_name_template";
pub const PREF_RATING_TEMPLATE: &str = "categories_collapsed_rating_template";
pub const PREF_POPULARITY_TEMPLATE: &str = "categories_collapsed_popularity_template";
pub const PREF_DEFAULT_SORT: &str = "tag_browser_category_default_sort";
pub const PREF_DEFAULT_SORT_DIRECTION: &str = "tag_browser_category_default_sort_direction";
pub const PREF_TWEAK_ORDER: &str = "tag_browser_category_tweak_order";

pub const DEFAULT_COLLAPSE_AT: usize = 50;
pub const DEFAULT_COLLAPSE_FL_AT: usize = 5;
pub const DEFAULT_NAME_TEMPLATE: &str = "{{ first.sort | shorten(4) }} - {{ last.sort | shorten(4) }}";
pub const DEFAULT_RATING_TEMPLATE: &str =
    "{{ first.avg_rating | fixed(2) }} - {{ last.avg_rating | fixed(2) }}";
pub const DEFAULT_POPULARITY_TEMPLATE: &str = "{{ first.count }} - {{ last.count }}";

/// Key/value preference storage. Values are JSON-like; each store decides how to persist them.
pub trait PrefStore: Send + Sync {
    fn get_pref(&self, key: &str) -> Result<Option<Value>, TagTreeError>;
    /// Store `value` under `key`. `Value::Null` removes the key.
    fn set_pref(&self, key: &str, value: Value) -> Result<(), TagTreeError>;
}

/// Typed access on top of any [PrefStore].
pub trait PrefStoreExt: PrefStore {
    fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, TagTreeError> {
        match self.get_pref(key)? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    fn set_typed<T: Serialize>(&self, key: &str, value: &T) -> Result<(), TagTreeError> {
        self.set_pref(key, serde_json::to_value(value)?)
    }
}

impl<S: PrefStore + ?Sized> PrefStoreExt for S {}

#[derive(Debug, Default)]
pub struct MemoryPrefStore {
    prefs: RwLock<BTreeMap<String, Value>>,
}

impl MemoryPrefStore {
    pub fn new() -> Self {
        MemoryPrefStore::default()
    }

    pub fn with(self, key: &str, value: Value) -> Self {
        self.prefs.write().insert(key.to_string(), value);
        self
    }
}

impl PrefStore for MemoryPrefStore {
    fn get_pref(&self, key: &str) -> Result<Option<Value>, TagTreeError> {
        Ok(self.prefs.read().get(key).cloned())
    }

    fn set_pref(&self, key: &str, value: Value) -> Result<(), TagTreeError> {
        let mut prefs = self.prefs.write();
        if value.is_null() {
            prefs.remove(key);
        } else {
            prefs.insert(key.to_string(), value);
        }
        Ok(())
    }
}

/// Preferences persisted as a single TOML document. Every access re-reads the file, so several
/// stores may point at the same path (last writer wins).
#[derive(Debug, Serialize, Deserialize)]
pub struct TomlPrefStore {
    path: PathBuf,
}

impl TomlPrefStore {
    pub fn new(path: PathBuf) -> Self {
        TomlPrefStore { path }
    }

    fn read_all(&self) -> Result<BTreeMap<String, Value>, TagTreeError> {
        if !self.path.exists() {
            tracing::debug!("Preference file {:?} not found, using empty preferences.", &self.path);
            return Ok(BTreeMap::new());
        }
        let content = read_to_string(&self.path)?;
        Ok(toml::from_str(&content)?)
    }
}

impl PrefStore for TomlPrefStore {
    fn get_pref(&self, key: &str) -> Result<Option<Value>, TagTreeError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set_pref(&self, key: &str, value: Value) -> Result<(), TagTreeError> {
        tracing::debug!("Writing preference '{}' to: {:?}", key, &self.path);
        let mut prefs = self.read_all()?;
        if value.is_null() {
            prefs.remove(key);
        } else {
            prefs.insert(key.to_string(), value);
        }
        write(&self.path, toml::to_string(&prefs)?)?;
        Ok(())
    }
}

/// The state transition graph used when a node is clicked without an explicit target state.
///
/// Persisted as `{"0": 1, "1": 2, ...}` (stringified state indices) because that is what JSON
/// object keys allow; in memory it is a typed map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, u8>", into = "BTreeMap<String, u8>")]
pub struct SearchOrderGraph(BTreeMap<TagState, TagState>);

impl SearchOrderGraph {
    pub fn new<I: IntoIterator<Item = (TagState, TagState)>>(edges: I) -> Self {
        SearchOrderGraph(edges.into_iter().collect())
    }

    /// Successor of `state`. States without an edge go back to [TagState::Clear].
    pub fn next(&self, state: TagState) -> TagState {
        self.0.get(&state).copied().unwrap_or_default()
    }
}

impl Default for SearchOrderGraph {
    fn default() -> Self {
        SearchOrderGraph::new([
            (TagState::Clear, TagState::MarkPlus),
            (TagState::MarkPlus, TagState::MarkPlusPlus),
            (TagState::MarkPlusPlus, TagState::MarkMinus),
            (TagState::MarkMinus, TagState::MarkMinusMinus),
            (TagState::MarkMinusMinus, TagState::Clear),
        ])
    }
}

impl TryFrom<BTreeMap<String, u8>> for SearchOrderGraph {
    type Error = String;

    fn try_from(raw: BTreeMap<String, u8>) -> Result<Self, Self::Error> {
        let mut edges = BTreeMap::new();
        for (from, to) in raw {
            let from_state = from
                .parse::<u8>()
                .ok()
                .and_then(TagState::from_index)
                .ok_or_else(|| format!("'{from}' is not a tag state"))?;
            let to_state =
                TagState::from_index(to).ok_or_else(|| format!("'{to}' is not a tag state"))?;
            edges.insert(from_state, to_state);
        }
        Ok(SearchOrderGraph(edges))
    }
}

impl From<SearchOrderGraph> for BTreeMap<String, u8> {
    fn from(graph: SearchOrderGraph) -> Self {
        graph
            .0
            .into_iter()
            .map(|(from, to)| (from.as_index().to_string(), to.as_index()))
            .collect()
    }
}

/// How over-large value lists are broken up.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollapseMode {
    #[serde(rename = "disable")]
    Disabled,
    #[serde(rename = "partition")]
    Partition,
    #[default]
    #[serde(rename = "first letter")]
    FirstLetter,
}

/// Effective collapse settings for one build.
#[derive(Debug, Clone, PartialEq)]
pub struct CollapseConfig {
    pub mode: CollapseMode,
    /// Categories with more values than this are collapsed
    pub threshold: usize,
    /// First-letter buckets smaller than this get merged with a neighbour (`<= 1` disables)
    pub first_letter_min: usize,
    /// Label template for partition runs
    pub template: String,
}

impl Default for CollapseConfig {
    fn default() -> Self {
        CollapseConfig {
            mode: CollapseMode::Disabled,
            threshold: DEFAULT_COLLAPSE_AT,
            first_letter_min: DEFAULT_COLLAPSE_FL_AT,
            template: DEFAULT_NAME_TEMPLATE.to_string(),
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryDefaultSort {
    /// Metadata declaration order
    #[default]
    Default,
    DisplayName,
    LookupName,
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Every preference the builder and model read, resolved to typed values.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeConfig {
    pub sort_by: SortOrder,
    pub collapse_at: usize,
    pub partition_method: CollapseMode,
    pub collapse_fl_at: usize,
    pub dont_collapse: BTreeSet<String>,
    pub hide_empty_categories: bool,
    pub hidden_categories: BTreeSet<String>,
    /// Persisted display order of category keys, if the user ever set one
    pub category_order: Option<Vec<String>>,
    pub categories_using_hierarchy: BTreeSet<String>,
    pub search_order: SearchOrderGraph,
    pub grouped_search_terms: BTreeMap<String, Vec<String>>,
    pub name_template: String,
    pub rating_template: String,
    pub popularity_template: String,
    pub default_sort: CategoryDefaultSort,
    pub default_sort_direction: SortDirection,
    /// `key -> weight` ordering tweak; `*` is the weight of unlisted keys
    pub tweak_order: BTreeMap<String, i64>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        TreeConfig {
            sort_by: SortOrder::Name,
            collapse_at: DEFAULT_COLLAPSE_AT,
            partition_method: CollapseMode::FirstLetter,
            collapse_fl_at: DEFAULT_COLLAPSE_FL_AT,
            dont_collapse: BTreeSet::new(),
            hide_empty_categories: false,
            hidden_categories: BTreeSet::new(),
            category_order: None,
            categories_using_hierarchy: BTreeSet::new(),
            search_order: SearchOrderGraph::default(),
            grouped_search_terms: BTreeMap::new(),
            name_template: DEFAULT_NAME_TEMPLATE.to_string(),
            rating_template: DEFAULT_RATING_TEMPLATE.to_string(),
            popularity_template: DEFAULT_POPULARITY_TEMPLATE.to_string(),
            default_sort: CategoryDefaultSort::Default,
            default_sort_direction: SortDirection::Ascending,
            tweak_order: BTreeMap::from([("*".to_string(), 1)]),
        }
    }
}

/// Read `key`, falling back to `default` when absent. Unreadable or malformed values also fall
/// back, with a diagnostic.
fn pref_or<T: DeserializeOwned>(
    store: &dyn PrefStore,
    key: &str,
    default: T,
    diagnostics: &mut Vec<BuildDiagnostic>,
) -> T {
    match store.get_typed::<T>(key) {
        Ok(Some(value)) => value,
        Ok(None) => default,
        Err(e) => {
            diagnostics.push(BuildDiagnostic::configuration(key, e.to_string()).logged());
            default
        }
    }
}

impl TreeConfig {
    pub fn load(store: &dyn PrefStore, diagnostics: &mut Vec<BuildDiagnostic>) -> TreeConfig {
        let defaults = TreeConfig::default();
        let d = diagnostics;
        let tweak_order = pref_or(store, PREF_TWEAK_ORDER, defaults.tweak_order, d);
        TreeConfig {
            sort_by: pref_or(store, PREF_SORT_BY, defaults.sort_by, d),
            collapse_at: pref_or(store, PREF_COLLAPSE_AT, defaults.collapse_at, d),
            partition_method: pref_or(store, PREF_PARTITION_METHOD, defaults.partition_method, d),
            collapse_fl_at: pref_or(store, PREF_COLLAPSE_FL_AT, defaults.collapse_fl_at, d),
            dont_collapse: pref_or(store, PREF_DONT_COLLAPSE, defaults.dont_collapse, d),
            hide_empty_categories: pref_or(store, PREF_HIDE_EMPTY, false, d),
            hidden_categories: pref_or(
                store,
                PREF_HIDDEN_CATEGORIES,
                defaults.hidden_categories,
                d,
            ),
            category_order: pref_or(store, PREF_CATEGORY_ORDER, None, d),
            categories_using_hierarchy: pref_or(
                store,
                PREF_HIERARCHICAL,
                defaults.categories_using_hierarchy,
                d,
            ),
            search_order: pref_or(store, PREF_SEARCH_ORDER, defaults.search_order, d),
            grouped_search_terms: pref_or(
                store,
                PREF_GROUPED_SEARCH_TERMS,
                defaults.grouped_search_terms,
                d,
            ),
            name_template: pref_or(store, PREF_NAME_TEMPLATE, defaults.name_template, d),
            rating_template: pref_or(store, PREF_RATING_TEMPLATE, defaults.rating_template, d),
            popularity_template: pref_or(
                store,
                PREF_POPULARITY_TEMPLATE,
                defaults.popularity_template,
                d,
            ),
            default_sort: pref_or(store, PREF_DEFAULT_SORT, defaults.default_sort, d),
            default_sort_direction: pref_or(
                store,
                PREF_DEFAULT_SORT_DIRECTION,
                defaults.default_sort_direction,
                d,
            ),
            tweak_order,
        }
    }

    /// Collapse settings for this configuration. First-letter collapsing only makes sense when
    /// values are sorted by name; the other sort orders partition with their own label template.
    pub fn collapse(&self) -> CollapseConfig {
        let mut collapse = CollapseConfig {
            mode: self.partition_method,
            threshold: self.collapse_at,
            first_letter_min: self.collapse_fl_at,
            template: self.name_template.clone(),
        };
        if self.collapse_at == 0 {
            collapse.mode = CollapseMode::Disabled;
        } else if collapse.mode != CollapseMode::Disabled {
            match self.sort_by {
                SortOrder::Name => {}
                SortOrder::Rating => {
                    collapse.mode = CollapseMode::Partition;
                    collapse.template = self.rating_template.clone();
                }
                SortOrder::Popularity => {
                    collapse.mode = CollapseMode::Partition;
                    collapse.template = self.popularity_template.clone();
                }
            }
        }
        collapse
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_log::test;

    #[test]
    fn test_search_order_round_trips_through_string_keys() {
        let store = MemoryPrefStore::new();
        store
            .set_typed(PREF_SEARCH_ORDER, &SearchOrderGraph::default())
            .unwrap();
        let raw = store.get_pref(PREF_SEARCH_ORDER).unwrap().unwrap();
        assert_eq!(raw, json!({"0": 1, "1": 2, "2": 3, "3": 4, "4": 0}));

        let graph: SearchOrderGraph = store.get_typed(PREF_SEARCH_ORDER).unwrap().unwrap();
        assert_eq!(graph.next(TagState::MarkMinus), TagState::MarkMinusMinus);
        assert_eq!(graph.next(TagState::MarkMinusMinus), TagState::Clear);
    }

    #[test]
    fn test_malformed_prefs_fall_back_with_diagnostics() {
        let store = MemoryPrefStore::new()
            .with(PREF_SORT_BY, json!("size"))
            .with(PREF_SEARCH_ORDER, json!({"0": 7}))
            .with(PREF_TWEAK_ORDER, json!(["not", "a", "map"]))
            .with(PREF_COLLAPSE_AT, json!(10));
        let mut diagnostics = Vec::new();
        let config = TreeConfig::load(&store, &mut diagnostics);

        assert_eq!(config.sort_by, SortOrder::Name);
        assert_eq!(config.search_order, SearchOrderGraph::default());
        assert_eq!(config.tweak_order.get("*"), Some(&1));
        assert_eq!(config.collapse_at, 10);
        assert_eq!(diagnostics.len(), 3);
        assert!(diagnostics.iter().all(|d| d.is_configuration()));
    }

    #[test]
    fn test_collapse_mode_follows_sort_order() {
        let mut config = TreeConfig::default();
        assert_eq!(config.collapse().mode, CollapseMode::FirstLetter);

        config.sort_by = SortOrder::Popularity;
        let collapse = config.collapse();
        assert_eq!(collapse.mode, CollapseMode::Partition);
        assert_eq!(collapse.template, DEFAULT_POPULARITY_TEMPLATE);

        config.collapse_at = 0;
        assert_eq!(config.collapse().mode, CollapseMode::Disabled);
    }

    #[test]
    fn test_toml_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.toml");
        let store = TomlPrefStore::new(path.clone());
        assert_eq!(store.get_pref(PREF_HIDE_EMPTY).unwrap(), None);

        store
            .set_pref(
                PREF_USER_CATEGORIES,
                json!({"Favourites": [["Tolkien", "authors", 0]]}),
            )
            .unwrap();
        store.set_pref(PREF_HIDE_EMPTY, json!(true)).unwrap();

        let reopened = TomlPrefStore::new(path);
        assert_eq!(reopened.get_typed::<bool>(PREF_HIDE_EMPTY).unwrap(), Some(true));
        assert_eq!(
            reopened.get_pref(PREF_USER_CATEGORIES).unwrap(),
            Some(json!({"Favourites": [["Tolkien", "authors", 0]]}))
        );

        reopened.set_pref(PREF_HIDE_EMPTY, Value::Null).unwrap();
        assert_eq!(store.get_pref(PREF_HIDE_EMPTY).unwrap(), None);
    }
}
