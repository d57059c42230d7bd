//! The persisted user-category mapping: `name -> [[value, category, 0], ...]`.
//!
//! Every operation here works on a [UserCategories] value that the caller loaded from, and saves
//! back to, the preference store in one piece. Concurrent mutators are not coordinated; the last
//! save wins.

use crate::{
    config::{PrefStore, PrefStoreExt, PREF_USER_CATEGORIES},
    error::TagTreeError,
    properties::{NEWS_CATEGORY, SEGMENT_SEPARATOR, USER_CATEGORY_PREFIX},
    tree::{NodeId, TagTree},
};
use serde::{Deserialize, Serialize};
use std::collections::{btree_map, BTreeMap};

/// One member of a user category. Persisted as `[name, category, 0]`; the trailing integer is
/// unused and always written as zero.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(String, String, u8)", into = "(String, String, u8)")]
pub struct UserCategoryEntry {
    pub name: String,
    pub category: String,
}

impl UserCategoryEntry {
    pub fn new(name: &str, category: &str) -> UserCategoryEntry {
        UserCategoryEntry {
            name: name.to_string(),
            category: category.to_string(),
        }
    }

    fn is(&self, name: &str, category: &str) -> bool {
        self.name == name && self.category == category
    }
}

impl From<(String, String, u8)> for UserCategoryEntry {
    fn from((name, category, _): (String, String, u8)) -> Self {
        UserCategoryEntry { name, category }
    }
}

impl From<UserCategoryEntry> for (String, String, u8) {
    fn from(entry: UserCategoryEntry) -> Self {
        (entry.name, entry.category, 0)
    }
}

/// User category name (without the `@` prefix, nested names dot-joined) to its members.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserCategories(BTreeMap<String, Vec<UserCategoryEntry>>);

impl UserCategories {
    pub fn load(prefs: &dyn PrefStore) -> Result<UserCategories, TagTreeError> {
        Ok(prefs.get_typed(PREF_USER_CATEGORIES)?.unwrap_or_default())
    }

    pub fn save(&self, prefs: &dyn PrefStore) -> Result<(), TagTreeError> {
        prefs.set_typed(PREF_USER_CATEGORIES, self)
    }

    pub fn keys(&self) -> btree_map::Keys<'_, String, Vec<UserCategoryEntry>> {
        self.0.keys()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Vec<UserCategoryEntry>> {
        self.0.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Vec<UserCategoryEntry>> {
        self.0.get(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Existing key equal to `name` ignoring case.
    pub fn find_ignoring_case(&self, name: &str) -> Option<&str> {
        let lower = name.to_lowercase();
        self.0
            .keys()
            .find(|k| k.to_lowercase() == lower)
            .map(String::as_str)
    }

    /// Create an empty user category. Returns false when it already exists.
    pub fn add_category(&mut self, name: &str) -> bool {
        if self.0.contains_key(name) {
            return false;
        }
        self.0.insert(name.to_string(), Vec::new());
        true
    }

    /// Remove `name` and every user category nested below it.
    pub fn remove_category(&mut self, name: &str) -> usize {
        let prefix = format!("{name}{SEGMENT_SEPARATOR}");
        let before = self.0.len();
        self.0.retain(|k, _| k != name && !k.starts_with(&prefix));
        before - self.0.len()
    }

    pub fn contains(&self, user_category: &str, name: &str, category: &str) -> bool {
        self.0
            .get(user_category)
            .map(|entries| entries.iter().any(|e| e.is(name, category)))
            .unwrap_or(false)
    }

    /// Add a member unless it is already listed. Returns whether anything changed.
    pub fn add_entry(&mut self, user_category: &str, name: &str, category: &str) -> bool {
        let entries = self.0.entry(user_category.to_string()).or_default();
        if entries.iter().any(|e| e.is(name, category)) {
            return false;
        }
        entries.push(UserCategoryEntry::new(name, category));
        true
    }

    pub fn remove_entry(&mut self, user_category: &str, name: &str, category: &str) -> bool {
        match self.0.get_mut(user_category) {
            Some(entries) => {
                let before = entries.len();
                entries.retain(|e| !e.is(name, category));
                before != entries.len()
            }
            None => false,
        }
    }

    /// Remove a member from every user category.
    pub fn delete_globally(&mut self, name: &str, category: &str) -> bool {
        let mut changed = false;
        for entries in self.0.values_mut() {
            let before = entries.len();
            entries.retain(|e| !e.is(name, category));
            changed |= before != entries.len();
        }
        changed
    }

    /// Follow a value rename in every user category. Where the new name is already listed the
    /// old entry is dropped instead of duplicating it.
    pub fn rename_globally(&mut self, old_name: &str, category: &str, new_name: &str) -> bool {
        let mut changed = false;
        for entries in self.0.values_mut() {
            let has_new = entries.iter().any(|e| e.is(new_name, category));
            let before = entries.clone();
            if has_new {
                entries.retain(|e| !e.is(old_name, category));
            } else {
                for entry in entries.iter_mut().filter(|e| e.is(old_name, category)) {
                    entry.name = new_name.to_string();
                }
            }
            changed |= before != *entries;
        }
        changed
    }

    /// Add `new_name` next to `original_name` wherever the latter is listed, keeping the
    /// original. Used for renames restricted to part of the collection, where both names may
    /// survive; [UserCategories::prune_dangling] drops the loser afterwards.
    pub fn add_renamed_item(&mut self, category: &str, original_name: &str, new_name: &str) -> bool {
        let mut changed = false;
        for entries in self.0.values_mut() {
            if entries.iter().any(|e| e.is(original_name, category))
                && !entries.iter().any(|e| e.is(new_name, category))
            {
                entries.push(UserCategoryEntry::new(new_name, category));
                changed = true;
            }
        }
        changed
    }

    /// Drop members whose category is gone or whose value no longer has any owning record.
    /// Returns the number of removed members. Empty user categories are kept.
    pub fn prune_dangling<C, V>(&mut self, category_exists: C, value_exists: V) -> usize
    where
        C: Fn(&str) -> bool,
        V: Fn(&str, &str) -> bool,
    {
        let mut removed = 0;
        for (user_category, entries) in self.0.iter_mut() {
            let before = entries.len();
            entries.retain(|e| category_exists(&e.category) && value_exists(&e.category, &e.name));
            if before != entries.len() {
                tracing::debug!(
                    "Dropped {} dangling entries from user category '{}'",
                    before - entries.len(),
                    user_category
                );
            }
            removed += before - entries.len();
        }
        removed
    }

    /// Rename user category `old` (and everything nested below it) to `new`.
    pub fn rename_category(&mut self, old: &str, new: &str) -> Result<(), TagTreeError> {
        if !self.0.contains_key(old) {
            return Err(TagTreeError::NotFound(format!("user category '{old}'")));
        }
        let prefix = format!("{old}{SEGMENT_SEPARATOR}");
        let moved = self
            .0
            .keys()
            .filter(|k| *k == old || k.starts_with(&prefix))
            .cloned()
            .collect::<Vec<_>>();
        for key in moved {
            if let Some(entries) = self.0.remove(&key) {
                let renamed = format!("{new}{}", &key[old.len()..]);
                self.0.insert(renamed, entries);
            }
        }
        Ok(())
    }

    /// Copy (or move) the values at `items`, with everything below them, into `destination`.
    ///
    /// On a move, values dragged out of a user category are removed from it. Values that come
    /// from a grouped search term or a standard category are only ever copied. Values of the
    /// `news` category are filed under `tags`. Returns whether anything changed.
    pub fn move_or_copy(
        &mut self,
        tree: &TagTree,
        items: &[NodeId],
        destination: &str,
        is_move: bool,
    ) -> bool {
        let mut changed = false;
        for item in items {
            let source = tree
                .owning_category(*item)
                .and_then(|c| tree.node(c).category().map(|i| (c, i.key.clone())));
            let source_uc = source.as_ref().and_then(|(id, key)| {
                let name = key.strip_prefix(USER_CATEGORY_PREFIX)?;
                (!tree.node(*id).is_gst() && self.0.contains_key(name)).then(|| name.to_string())
            });
            changed |= self.copy_node(tree, *item, destination, is_move, source_uc.as_deref());
        }
        changed
    }

    fn copy_node(
        &mut self,
        tree: &TagTree,
        id: NodeId,
        destination: &str,
        is_move: bool,
        source_uc: Option<&str>,
    ) -> bool {
        let mut changed = false;
        if let Some(record) = tree.node(id).value() {
            if let (true, Some(source_uc)) = (is_move, source_uc) {
                changed |= self.remove_entry(source_uc, &record.original_name, &record.category);
            }
            let category = if record.category == NEWS_CATEGORY {
                "tags"
            } else {
                record.category.as_str()
            };
            changed |= self.add_entry(destination, &record.original_name, category);
        }
        for child in tree.children(id) {
            changed |= self.copy_node(tree, *child, destination, is_move, source_uc);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::MemoryPrefStore,
        properties::{EnumSet, NodeFlag, ValueRecord},
        tree::CategoryItem,
    };
    use serde_json::json;
    use test_log::test;

    fn entries(ucs: &UserCategories, name: &str) -> Vec<(String, String)> {
        ucs.get(name)
            .map(|e| {
                e.iter()
                    .map(|e| (e.name.clone(), e.category.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_persisted_shape() {
        let prefs = MemoryPrefStore::new()
            .with(PREF_USER_CATEGORIES, json!({"Fav": [["Tolkien", "authors", 0]]}));
        let mut ucs = UserCategories::load(&prefs).unwrap();
        assert!(ucs.contains("Fav", "Tolkien", "authors"));
        ucs.add_entry("Fav", "SF", "tags");
        ucs.save(&prefs).unwrap();
        assert_eq!(
            prefs.get_pref(PREF_USER_CATEGORIES).unwrap(),
            Some(json!({"Fav": [["Tolkien", "authors", 0], ["SF", "tags", 0]]}))
        );
    }

    #[test]
    fn test_rename_globally_avoids_duplicates() {
        let mut ucs = UserCategories::default();
        ucs.add_entry("A", "SF", "tags");
        ucs.add_entry("A", "Science Fiction", "tags");
        ucs.add_entry("B", "SF", "tags");
        ucs.add_entry("B", "SF", "#genre");
        assert!(ucs.rename_globally("SF", "tags", "Science Fiction"));
        assert_eq!(
            entries(&ucs, "A"),
            vec![("Science Fiction".to_string(), "tags".to_string())]
        );
        assert_eq!(
            entries(&ucs, "B"),
            vec![
                ("Science Fiction".to_string(), "tags".to_string()),
                ("SF".to_string(), "#genre".to_string())
            ]
        );
        assert!(!ucs.rename_globally("missing", "tags", "x"));
    }

    #[test]
    fn test_add_renamed_item_keeps_original() {
        let mut ucs = UserCategories::default();
        ucs.add_entry("A", "SF", "tags");
        ucs.add_entry("B", "SF", "#genre");
        assert!(ucs.add_renamed_item("tags", "SF", "Science Fiction"));
        assert!(ucs.contains("A", "SF", "tags"));
        assert!(ucs.contains("A", "Science Fiction", "tags"));
        assert!(!ucs.contains("B", "Science Fiction", "#genre"));
        assert!(!ucs.add_renamed_item("tags", "SF", "Science Fiction"));
    }

    #[test]
    fn test_prune_dangling_keeps_empty_categories() {
        let mut ucs = UserCategories::default();
        ucs.add_entry("A", "Gone", "tags");
        ucs.add_entry("A", "Here", "tags");
        ucs.add_entry("B", "X", "#removed");
        let removed = ucs.prune_dangling(|c| c != "#removed", |_, name| name != "Gone");
        assert_eq!(removed, 2);
        assert_eq!(
            entries(&ucs, "A"),
            vec![("Here".to_string(), "tags".to_string())]
        );
        assert!(ucs.contains_key("B"));
    }

    #[test]
    fn test_rename_category_moves_nested_keys() {
        let mut ucs = UserCategories::default();
        ucs.add_category("Read");
        ucs.add_entry("Read.Later", "SF", "tags");
        ucs.add_category("Reader");
        ucs.rename_category("Read", "Queue").unwrap();
        assert_eq!(
            ucs.keys().cloned().collect::<Vec<_>>(),
            vec!["Queue", "Queue.Later", "Reader"]
        );
        assert!(ucs.rename_category("Nope", "X").is_err());
        assert_eq!(ucs.remove_category("Queue"), 2);
    }

    #[test]
    fn test_move_or_copy_recurses_and_moves() {
        let mut tree = TagTree::new();
        let fav = tree.add_category(
            tree.root(),
            CategoryItem {
                name: "Fav".to_string(),
                key: "@Fav".to_string(),
                tooltip: None,
            },
            EnumSet::only(NodeFlag::Searchable),
        );
        let parent = tree.add_value(fav, ValueRecord::new("Fiction", "tags"), false);
        tree.add_value(parent, ValueRecord::new("Fiction.SF", "tags"), false);
        let news = tree.add_value(fav, ValueRecord::new("Daily", NEWS_CATEGORY), false);

        let mut ucs = UserCategories::default();
        ucs.add_entry("Fav", "Fiction", "tags");
        ucs.add_entry("Fav", "Fiction.SF", "tags");
        ucs.add_category("Other");

        assert!(ucs.move_or_copy(&tree, &[parent, news], "Other", true));
        assert_eq!(
            entries(&ucs, "Other"),
            vec![
                ("Fiction".to_string(), "tags".to_string()),
                ("Fiction.SF".to_string(), "tags".to_string()),
                ("Daily".to_string(), "tags".to_string()),
            ]
        );
        assert!(entries(&ucs, "Fav").is_empty());
        // copying again changes nothing
        assert!(!ucs.move_or_copy(&tree, &[parent], "Other", false));
    }
}
