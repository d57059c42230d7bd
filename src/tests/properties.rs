//! Property checks over randomly generated hierarchies

use super::helpers::*;
use crate::{
    config::{PREF_COLLAPSE_AT, PREF_HIERARCHICAL},
    tree::find_category_node,
};
use proptest::prelude::*;
use serde_json::json;

fn dotted_tag() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(vec!["a", "b", "c"]), 1..=3)
        .prop_map(|segments| segments.join("."))
}

fn library() -> impl Strategy<Value = Vec<Vec<String>>> {
    prop::collection::vec(prop::collection::vec(dotted_tag(), 1..4), 1..12)
}

proptest! {
    #[test]
    fn hierarchy_counts_cover_every_descendant(books in library()) {
        let (store, source) = empty_library(&[
            (PREF_HIERARCHICAL, json!(["tags"])),
            (PREF_COLLAPSE_AT, json!(0)),
        ]);
        for (idx, tags) in books.iter().enumerate() {
            let tags = tags.iter().map(String::as_str).collect::<Vec<_>>();
            source.add_book(idx as u64 + 1, &[("tags", &tags)], None);
        }
        let (model, _rx) = model_for(store, source);
        model.rebuild().unwrap();
        let tree = model.tree();
        let category = find_category_node(&tree, "tags").unwrap();

        for id in tree.child_values(category) {
            let name = tree.node(id).value().unwrap().original_name.clone();
            let prefix = format!("{name}.");
            let expected = books
                .iter()
                .filter(|tags| tags.iter().any(|t| *t == name || t.starts_with(&prefix)))
                .count();
            prop_assert_eq!(tree.item_count(id), expected, "{}", name);
            // Sibling names never repeat
            if let Some(parent) = tree.parent(id) {
                let siblings = tree
                    .children(parent)
                    .iter()
                    .filter(|s| tree.node(**s).name() == tree.node(id).name())
                    .count();
                prop_assert_eq!(siblings, 1);
            }
        }
    }

    #[test]
    fn paths_resolve_to_their_node(books in library()) {
        let (store, source) = empty_library(&[(PREF_HIERARCHICAL, json!(["tags"]))]);
        for (idx, tags) in books.iter().enumerate() {
            let tags = tags.iter().map(String::as_str).collect::<Vec<_>>();
            source.add_book(idx as u64 + 1, &[("tags", &tags)], None);
        }
        let (model, _rx) = model_for(store, source);
        model.rebuild().unwrap();
        let tree = model.tree();
        for id in tree.all_children(tree.root()) {
            let path = crate::tree::path_for(&tree, id);
            prop_assert_eq!(crate::tree::node_for(&tree, &path), Some(id));
            let names = crate::tree::named_path_for(&tree, id);
            prop_assert_eq!(crate::tree::node_for_named_path(&tree, &names), Some(id));
        }
    }
}
