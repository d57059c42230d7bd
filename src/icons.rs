//! Icon assignments for categories and values.
//!
//! Only the preference maps live here; loading image files is left to the view. The maps are kept
//! in step with renames so an icon follows its value or user category.

use crate::{
    config::{PrefStore, PrefStoreExt, PREF_CATEGORY_ICONS, PREF_VALUE_ICONS},
    error::TagTreeError,
    properties::SEGMENT_SEPARATOR,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Icon of one value. Persisted as `[file, for_children]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, bool)", into = "(String, bool)")]
pub struct ValueIcon {
    pub file: String,
    /// Also used by hierarchical children without an icon of their own
    pub for_children: bool,
}

impl From<(String, bool)> for ValueIcon {
    fn from((file, for_children): (String, bool)) -> Self {
        ValueIcon { file, for_children }
    }
}

impl From<ValueIcon> for (String, bool) {
    fn from(icon: ValueIcon) -> Self {
        (icon.file, icon.for_children)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IconPrefs {
    categories: BTreeMap<String, String>,
    values: BTreeMap<String, BTreeMap<String, ValueIcon>>,
}

impl IconPrefs {
    pub fn load(prefs: &dyn PrefStore) -> Result<IconPrefs, TagTreeError> {
        Ok(IconPrefs {
            categories: prefs.get_typed(PREF_CATEGORY_ICONS)?.unwrap_or_default(),
            values: prefs.get_typed(PREF_VALUE_ICONS)?.unwrap_or_default(),
        })
    }

    pub fn save(&self, prefs: &dyn PrefStore) -> Result<(), TagTreeError> {
        prefs.set_typed(PREF_CATEGORY_ICONS, &self.categories)?;
        prefs.set_typed(PREF_VALUE_ICONS, &self.values)
    }

    pub fn category_icon(&self, key: &str) -> Option<&str> {
        self.categories.get(key).map(String::as_str)
    }

    pub fn set_category_icon(&mut self, key: &str, file: &str) {
        self.categories.insert(key.to_string(), file.to_string());
    }

    pub fn remove_category_icon(&mut self, key: &str) -> bool {
        self.categories.remove(key).is_some()
    }

    /// Icon file for a value: its own, or the closest hierarchical parent's that applies to
    /// children.
    pub fn value_icon(&self, category: &str, original_name: &str) -> Option<&str> {
        let icons = self.values.get(category)?;
        if let Some(icon) = icons.get(original_name) {
            return Some(&icon.file);
        }
        let mut name = original_name;
        while let Some((parent, _)) = name.rsplit_once(SEGMENT_SEPARATOR) {
            if let Some(icon) = icons.get(parent).filter(|i| i.for_children) {
                return Some(&icon.file);
            }
            name = parent;
        }
        None
    }

    pub fn set_value_icon(&mut self, category: &str, original_name: &str, icon: ValueIcon) {
        self.values
            .entry(category.to_string())
            .or_default()
            .insert(original_name.to_string(), icon);
    }

    pub fn remove_value_icon(&mut self, category: &str, original_name: &str) -> bool {
        self.values
            .get_mut(category)
            .and_then(|icons| icons.remove(original_name))
            .is_some()
    }

    /// Move the icon of a renamed value.
    pub fn rename_value(&mut self, category: &str, old_name: &str, new_name: &str) -> bool {
        match self.values.get_mut(category) {
            Some(icons) => match icons.remove(old_name) {
                Some(icon) => {
                    icons.insert(new_name.to_string(), icon);
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Move category icons from `old_key` (and keys nested below it) to `new_key`.
    pub fn rename_category(&mut self, old_key: &str, new_key: &str) -> bool {
        let prefix = format!("{old_key}{SEGMENT_SEPARATOR}");
        let moved = self
            .categories
            .keys()
            .filter(|k| *k == old_key || k.starts_with(&prefix))
            .cloned()
            .collect::<Vec<_>>();
        for key in moved.iter() {
            if let Some(file) = self.categories.remove(key) {
                self.categories
                    .insert(format!("{new_key}{}", &key[old_key.len()..]), file);
            }
        }
        !moved.is_empty()
    }
}
