//! The metadata-store boundary.
//!
//! The tree never owns collection data. It asks a [CategorySource] for the values of every
//! category, for per-record ratings and for the handful of write operations renames need.
//! [MemorySource] is a complete in-memory implementation over simple book records; it backs the
//! tests and benchmarks and is a reasonable reference for real stores.

use crate::{
    config::{PrefStore, PrefStoreExt, PREF_GROUPED_SEARCH_TERMS},
    error::TagTreeError,
    properties::{
        BookId, FieldKind, FieldMeta, HierarchyMarker, SortOrder, ValueRecord, SEARCH_CATEGORY,
        SEGMENT_SEPARATOR, USER_CATEGORY_PREFIX,
    },
    user_categories::UserCategories,
};
use parking_lot::RwLock;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

/// Category key to that category's values, each list already sorted.
pub type CategoryData = BTreeMap<String, Vec<ValueRecord>>;

/// Record id to rating on a 0..=10 (half star) scale.
pub type RatingMap = BTreeMap<BookId, u8>;

pub trait CategorySource: Send + Sync {
    /// Every category field, in declaration order, including `@` user categories and grouped
    /// search terms.
    fn field_metadata(&self) -> Vec<FieldMeta>;

    /// Values per category, sorted by `sort`. `book_ids` restricts counts and id-sets to those
    /// records. With `first_letter_sort`, name sorting uses each value's sort text, except for the
    /// categories in `uncollapsed`.
    fn get_categories(
        &self,
        sort: SortOrder,
        book_ids: Option<&BTreeSet<BookId>>,
        first_letter_sort: bool,
        uncollapsed: &BTreeSet<String>,
    ) -> Result<CategoryData, TagTreeError>;

    /// Shared per-record rating map. Readers hold the read guard for as long as they aggregate.
    fn rating_map(&self) -> Arc<RwLock<RatingMap>>;

    /// Records the current view is restricted to (a virtual library), if any.
    fn restricted_book_ids(&self) -> Option<BTreeSet<BookId>> {
        None
    }

    /// Rename a value of `category` on every record holding it (or only on `restrict_to`).
    fn rename_item(
        &self,
        category: &str,
        old_name: &str,
        new_name: &str,
        restrict_to: Option<&BTreeSet<BookId>>,
    ) -> Result<(), TagTreeError>;

    /// Records holding `name` in `category`. Empty when the value (or category) is gone.
    fn books_for_item(&self, category: &str, name: &str) -> BTreeSet<BookId>;

    fn saved_search_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn rename_saved_search(&self, old_name: &str, _new_name: &str) -> Result<(), TagTreeError> {
        Err(TagTreeError::NotFound(format!("saved search '{old_name}'")))
    }

    /// Values of `category` that have notes attached.
    fn items_with_notes(&self, _category: &str) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// Value to link map of `category`.
    fn link_map(&self, _category: &str) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

/// One record of a [MemorySource]: field key to the values the record holds.
pub type BookFields = BTreeMap<String, Vec<String>>;

pub struct MemorySource {
    fields: Vec<FieldMeta>,
    books: RwLock<BTreeMap<BookId, BookFields>>,
    sorts: RwLock<BTreeMap<(String, String), String>>,
    ratings: Arc<RwLock<RatingMap>>,
    searches: RwLock<BTreeMap<String, String>>,
    notes: RwLock<BTreeMap<String, BTreeSet<String>>>,
    links: RwLock<BTreeMap<String, BTreeMap<String, String>>>,
    restriction: RwLock<Option<BTreeSet<BookId>>>,
    prefs: Arc<dyn PrefStore>,
}

impl MemorySource {
    /// A source whose user categories and grouped search terms are read from `prefs`.
    pub fn new(prefs: Arc<dyn PrefStore>) -> MemorySource {
        MemorySource {
            fields: Vec::new(),
            books: RwLock::new(BTreeMap::new()),
            sorts: RwLock::new(BTreeMap::new()),
            ratings: Arc::new(RwLock::new(BTreeMap::new())),
            searches: RwLock::new(BTreeMap::new()),
            notes: RwLock::new(BTreeMap::new()),
            links: RwLock::new(BTreeMap::new()),
            restriction: RwLock::new(None),
            prefs,
        }
    }

    pub fn with_field(mut self, field: FieldMeta) -> MemorySource {
        self.fields.push(field);
        self
    }

    /// Add (or replace) a record. `rating` is on the 0..=10 scale.
    pub fn add_book(&self, id: BookId, fields: &[(&str, &[&str])], rating: Option<u8>) {
        let record = fields
            .iter()
            .map(|(key, values)| {
                (
                    key.to_string(),
                    values.iter().map(|v| v.to_string()).collect::<Vec<_>>(),
                )
            })
            .collect::<BookFields>();
        self.books.write().insert(id, record);
        let mut ratings = self.ratings.write();
        match rating {
            Some(r) => ratings.insert(id, r),
            None => ratings.remove(&id),
        };
    }

    pub fn remove_book(&self, id: BookId) {
        self.books.write().remove(&id);
        self.ratings.write().remove(&id);
    }

    pub fn set_sort(&self, category: &str, name: &str, sort: &str) {
        self.sorts
            .write()
            .insert((category.to_string(), name.to_string()), sort.to_string());
    }

    pub fn add_saved_search(&self, name: &str, expression: &str) {
        self.searches
            .write()
            .insert(name.to_string(), expression.to_string());
    }

    pub fn add_note(&self, category: &str, name: &str) {
        self.notes
            .write()
            .entry(category.to_string())
            .or_default()
            .insert(name.to_string());
    }

    pub fn add_link(&self, category: &str, name: &str, link: &str) {
        self.links
            .write()
            .entry(category.to_string())
            .or_default()
            .insert(name.to_string(), link.to_string());
    }

    pub fn set_restriction(&self, book_ids: Option<BTreeSet<BookId>>) {
        *self.restriction.write() = book_ids;
    }

    fn user_categories(&self) -> UserCategories {
        match UserCategories::load(self.prefs.as_ref()) {
            Ok(ucs) => ucs,
            Err(e) => {
                tracing::warn!("Could not read user categories: {e}");
                UserCategories::default()
            }
        }
    }

    fn grouped_search_terms(&self) -> BTreeMap<String, Vec<String>> {
        self.prefs
            .get_typed(PREF_GROUPED_SEARCH_TERMS)
            .unwrap_or_else(|e| {
                tracing::warn!("Could not read grouped search terms: {e}");
                None
            })
            .unwrap_or_default()
    }

    fn field_values(
        &self,
        field: &FieldMeta,
        book_ids: Option<&BTreeSet<BookId>>,
    ) -> Vec<ValueRecord> {
        let books = self.books.read();
        let ratings = self.ratings.read();
        let sorts = self.sorts.read();
        let mut by_name: BTreeMap<&str, BTreeSet<BookId>> = BTreeMap::new();
        for (id, record) in books.iter() {
            if book_ids.map(|ids| !ids.contains(id)).unwrap_or(false) {
                continue;
            }
            for value in record.get(&field.key).into_iter().flatten() {
                by_name.entry(value.as_str()).or_default().insert(*id);
            }
        }
        by_name
            .into_iter()
            .enumerate()
            .map(|(idx, (name, ids))| {
                let rated = ids
                    .iter()
                    .filter_map(|id| ratings.get(id).filter(|r| **r > 0))
                    .map(|r| f64::from(*r) / 2.0)
                    .collect::<Vec<_>>();
                let mut record = ValueRecord::new(name, &field.key).with_ids(ids);
                record.id = Some(idx as u64 + 1);
                if !rated.is_empty() {
                    record.avg_rating = Some(rated.iter().sum::<f64>() / rated.len() as f64);
                }
                record.sort = sorts.get(&(field.key.clone(), name.to_string())).cloned();
                record
            })
            .collect()
    }

    fn saved_search_values(&self) -> Vec<ValueRecord> {
        self.searches
            .read()
            .iter()
            .map(|(name, expression)| {
                let mut record = ValueRecord::new(name, SEARCH_CATEGORY);
                record.search_expression = Some(expression.clone());
                record
            })
            .collect()
    }
}

fn sort_values(
    values: &mut [ValueRecord],
    sort: SortOrder,
    use_sort_text: bool,
) {
    let name_key = |v: &ValueRecord| {
        if use_sort_text {
            v.sort_text().to_lowercase()
        } else {
            v.name.to_lowercase()
        }
    };
    match sort {
        SortOrder::Name => values.sort_by_key(name_key),
        SortOrder::Popularity => {
            values.sort_by(|a, b| b.count.cmp(&a.count).then(name_key(a).cmp(&name_key(b))))
        }
        SortOrder::Rating => values.sort_by(|a, b| {
            b.avg_rating
                .unwrap_or(0.0)
                .total_cmp(&a.avg_rating.unwrap_or(0.0))
                .then(name_key(a).cmp(&name_key(b)))
        }),
    }
}

impl CategorySource for MemorySource {
    fn field_metadata(&self) -> Vec<FieldMeta> {
        let mut fields = self.fields.clone();
        let mut user_keys = BTreeSet::new();
        for key in self.user_categories().keys() {
            // Parents of nested user categories are categories in their own right
            let mut path = String::new();
            for segment in key.split(SEGMENT_SEPARATOR) {
                if !path.is_empty() {
                    path.push(SEGMENT_SEPARATOR);
                }
                path.push_str(segment);
                user_keys.insert(path.clone());
            }
        }
        user_keys.extend(self.grouped_search_terms().into_keys());
        for key in user_keys {
            let lookup = format!("{USER_CATEGORY_PREFIX}{key}");
            if fields.iter().all(|f| f.key != lookup) {
                fields.push(FieldMeta::new(&lookup, &key, FieldKind::User));
            }
        }
        fields
    }

    fn get_categories(
        &self,
        sort: SortOrder,
        book_ids: Option<&BTreeSet<BookId>>,
        first_letter_sort: bool,
        uncollapsed: &BTreeSet<String>,
    ) -> Result<CategoryData, TagTreeError> {
        let mut data = CategoryData::new();
        for field in self.fields.iter().filter(|f| !f.kind.is_user()) {
            let mut values = if field.key == SEARCH_CATEGORY {
                self.saved_search_values()
            } else {
                self.field_values(field, book_ids)
            };
            if values.is_empty() {
                continue;
            }
            let use_sort_text = first_letter_sort && !uncollapsed.contains(&field.key);
            sort_values(&mut values, sort, use_sort_text);
            data.insert(field.key.clone(), values);
        }

        for (uc_name, entries) in self.user_categories().iter() {
            let mut values = entries
                .iter()
                .filter_map(|entry| {
                    data.get(&entry.category)?
                        .iter()
                        .find(|v| v.original_name == entry.name)
                        .cloned()
                })
                .collect::<Vec<_>>();
            sort_values(&mut values, sort, false);
            data.insert(format!("{USER_CATEGORY_PREFIX}{uc_name}"), values);
        }

        for (gst_name, members) in self.grouped_search_terms() {
            let mut merged: BTreeMap<String, ValueRecord> = BTreeMap::new();
            for member in members.iter() {
                for value in data.get(member).into_iter().flatten() {
                    match merged.get_mut(&value.original_name) {
                        Some(existing) => {
                            existing.id_set.extend(value.id_set.iter().copied());
                            existing.count = existing.id_set.len();
                        }
                        None => {
                            let mut value = value.clone();
                            value.is_hierarchical = HierarchyMarker::None;
                            merged.insert(value.original_name.clone(), value);
                        }
                    }
                }
            }
            let mut values = merged.into_values().collect::<Vec<_>>();
            sort_values(&mut values, sort, false);
            data.insert(format!("{USER_CATEGORY_PREFIX}{gst_name}"), values);
        }
        Ok(data)
    }

    fn rating_map(&self) -> Arc<RwLock<RatingMap>> {
        self.ratings.clone()
    }

    fn restricted_book_ids(&self) -> Option<BTreeSet<BookId>> {
        self.restriction.read().clone()
    }

    fn rename_item(
        &self,
        category: &str,
        old_name: &str,
        new_name: &str,
        restrict_to: Option<&BTreeSet<BookId>>,
    ) -> Result<(), TagTreeError> {
        if self.fields.iter().all(|f| f.key != category) {
            return Err(TagTreeError::NotFound(format!("category '{category}'")));
        }
        let mut books = self.books.write();
        for (id, record) in books.iter_mut() {
            if restrict_to.map(|ids| !ids.contains(id)).unwrap_or(false) {
                continue;
            }
            if let Some(values) = record.get_mut(category) {
                if values.iter().any(|v| v == old_name) {
                    values.retain(|v| v != old_name && v != new_name);
                    values.push(new_name.to_string());
                }
            }
        }
        let mut sorts = self.sorts.write();
        if let Some(sort) = sorts.remove(&(category.to_string(), old_name.to_string())) {
            sorts.insert((category.to_string(), new_name.to_string()), sort);
        }
        tracing::debug!("Renamed {category}:{old_name} to {new_name}");
        Ok(())
    }

    fn books_for_item(&self, category: &str, name: &str) -> BTreeSet<BookId> {
        self.books
            .read()
            .iter()
            .filter(|(_, record)| {
                record
                    .get(category)
                    .map(|values| values.iter().any(|v| v == name))
                    .unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect()
    }

    fn saved_search_names(&self) -> Vec<String> {
        self.searches.read().keys().cloned().collect()
    }

    fn rename_saved_search(&self, old_name: &str, new_name: &str) -> Result<(), TagTreeError> {
        let mut searches = self.searches.write();
        let expression = searches
            .remove(old_name)
            .ok_or_else(|| TagTreeError::NotFound(format!("saved search '{old_name}'")))?;
        searches.insert(new_name.to_string(), expression);
        Ok(())
    }

    fn items_with_notes(&self, category: &str) -> BTreeSet<String> {
        self.notes.read().get(category).cloned().unwrap_or_default()
    }

    fn link_map(&self, category: &str) -> BTreeMap<String, String> {
        self.links.read().get(category).cloned().unwrap_or_default()
    }
}
