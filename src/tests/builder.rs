//! Tree construction through a model over the sample library

use super::helpers::*;
use crate::{
    config::{
        PrefStore, PREF_CATEGORY_ORDER, PREF_COLLAPSE_AT, PREF_COLLAPSE_FL_AT, PREF_DEFAULT_SORT,
        PREF_HIDDEN_CATEGORIES, PREF_HIDE_EMPTY, PREF_HIERARCHICAL, PREF_NAME_TEMPLATE,
        PREF_PARTITION_METHOD, PREF_USER_CATEGORIES,
    },
    properties::{HierarchyMarker, NodeFlag, TagState},
    tree::{find_category_node, path_for},
};
use serde_json::json;
use test_log::test;

#[test]
fn test_hierarchy_decomposition_and_aggregates() {
    let (store, source) = sample_library(&[(PREF_HIERARCHICAL, json!(["tags"]))]);
    let (model, _rx) = model_for(store, source);
    model.rebuild().unwrap();
    let tree = model.tree();

    let tags = find_category_node(&tree, "tags").unwrap();
    assert_eq!(child_names(&tree, tags), vec!["Fiction", "FictionLike", "Humour"]);

    let fiction = find_value(&tree, "tags", "Fiction").unwrap();
    assert_eq!(child_names(&tree, fiction), vec!["Fantasy", "SF"]);
    assert_eq!(tree.node(fiction).hierarchy, HierarchyMarker::FiveState);
    // books 1, 2 and 3 carry Fiction or one of its descendants
    assert_eq!(tree.item_count(fiction), 3);
    assert_eq!(tree.average_rating(fiction).unwrap(), Some(4.0));

    let sf = find_value(&tree, "tags", "Fiction.SF").unwrap();
    assert_eq!(child_names(&tree, sf), vec!["Robots"]);
    assert_eq!(tree.item_count(sf), 2);
    assert_eq!(tree.average_rating(sf).unwrap(), Some(3.5));

    // person names never decompose
    let authors = find_category_node(&tree, "authors").unwrap();
    assert_eq!(
        child_names(&tree, authors),
        vec!["Adams", "Asimov", "Herbert", "Tolkien"]
    );
    drop(tree);

    let dump = model.dump();
    assert!(dump.contains("\n  Fiction [count=3,rating=4.0]\n"), "{dump}");
    assert!(dump.contains("\n    Fantasy [count=1,rating=5.0]\n"), "{dump}");
}

#[test]
fn test_partition_never_splits_hierarchy_prefix() {
    let (store, source) = sample_library(&[
        (PREF_HIERARCHICAL, json!(["tags"])),
        (PREF_PARTITION_METHOD, json!("partition")),
        (PREF_COLLAPSE_AT, json!(2)),
    ]);
    let (model, _rx) = model_for(store, source);
    model.rebuild().unwrap();
    let tree = model.tree();

    let tags = find_category_node(&tree, "tags").unwrap();
    assert_eq!(child_names(&tree, tags), vec!["Fict - Fict", "Fict - Humo"]);
    let runs = tree.children(tags).to_vec();
    for run in runs.iter() {
        assert!(tree.node(*run).is_temporary());
        assert!(!tree.node(*run).has(NodeFlag::Searchable));
    }
    // The whole Fiction hierarchy stays in the first run even though it is longer than two
    assert_eq!(child_names(&tree, runs[0]), vec!["Fiction"]);
    assert_eq!(tree.all_children(runs[0]).len(), 4);
    assert_eq!(child_names(&tree, runs[1]), vec!["FictionLike", "Humour"]);
}

#[test]
fn test_partition_run_follows_plain_parent_into_hierarchy() {
    init_logging();
    let (store, source) = empty_library(&[
        (PREF_HIERARCHICAL, json!(["tags"])),
        (PREF_PARTITION_METHOD, json!("partition")),
        (PREF_COLLAPSE_AT, json!(3)),
    ]);
    for (id, tag) in ["Alpha", "Beta", "Fiction", "Fiction.X", "Zed"].into_iter().enumerate() {
        source.add_book(id as u64 + 1, &[("tags", &[tag])], None);
    }
    let (model, _rx) = model_for(store, source);
    model.rebuild().unwrap();
    let tree = model.tree();

    let tags = find_category_node(&tree, "tags").unwrap();
    assert_eq!(child_names(&tree, tags), vec!["Alph - Fict", "Zed - Zed"]);
    let runs = tree.children(tags).to_vec();
    assert_eq!(child_names(&tree, runs[0]), vec!["Alpha", "Beta", "Fiction"]);
    let fiction = find_value(&tree, "tags", "Fiction").unwrap();
    assert_eq!(child_names(&tree, fiction), vec!["X"]);
    assert_eq!(child_names(&tree, runs[1]), vec!["Zed"]);
}

#[test]
fn test_template_failure_attaches_runs_to_category() {
    let (store, source) = sample_library(&[
        (PREF_HIERARCHICAL, json!(["tags"])),
        (PREF_PARTITION_METHOD, json!("partition")),
        (PREF_COLLAPSE_AT, json!(2)),
        (PREF_NAME_TEMPLATE, json!("{{ first.nope }}")),
    ]);
    let (model, _rx) = model_for(store, source);
    let diagnostics = model.rebuild().unwrap();

    // One report per collapsed category: authors and tags
    let templates = diagnostics
        .iter()
        .filter(|d| d.is_template())
        .collect::<Vec<_>>();
    assert_eq!(templates.len(), 2, "{diagnostics:?}");

    let tree = model.tree();
    let tags = find_category_node(&tree, "tags").unwrap();
    assert_eq!(child_names(&tree, tags), vec!["Fiction", "FictionLike", "Humour"]);
}

#[test]
fn test_first_letter_buckets_compose_one_clause() {
    let (store, source) = sample_library(&[
        (PREF_COLLAPSE_AT, json!(2)),
        (PREF_COLLAPSE_FL_AT, json!(1)),
    ]);
    let (model, _rx) = model_for(store, source);
    model.rebuild().unwrap();
    let bucket_path = {
        let tree = model.tree();
        let authors = find_category_node(&tree, "authors").unwrap();
        assert_eq!(child_names(&tree, authors), vec!["A", "H", "T"]);
        let bucket = tree.children(authors)[0];
        assert_eq!(child_names(&tree, bucket), vec!["Adams", "Asimov"]);
        path_for(&tree, bucket)
    };

    assert!(model.toggle(&bucket_path, false, None));
    assert_eq!(
        model.tokens(),
        vec![r#"author_sort:"""~(^[A])|(&\s*[A])""""#]
    );
}

#[test]
fn test_empty_and_hidden_categories_are_pruned() {
    let ucs = json!({"Empty": [], "Fav": [["Tolkien", "authors", 0]]});
    let (store, source) = sample_library(&[
        (PREF_HIDE_EMPTY, json!(true)),
        (PREF_HIDDEN_CATEGORIES, json!(["series"])),
        (PREF_USER_CATEGORIES, ucs.clone()),
    ]);
    let (model, _rx) = model_for(store, source);
    model.rebuild().unwrap();
    assert_eq!(
        top_level_keys(&model.tree()),
        vec!["authors", "tags", "search", "#genre", "@Fav"]
    );

    let (store, source) = sample_library(&[(PREF_USER_CATEGORIES, ucs)]);
    let (model, _rx) = model_for(store, source);
    model.rebuild().unwrap();
    assert_eq!(
        top_level_keys(&model.tree()),
        vec!["authors", "series", "tags", "search", "#genre", "@Empty", "@Fav"]
    );
}

#[test]
fn test_nested_user_categories() {
    let (store, source) = sample_library(&[(
        PREF_USER_CATEGORIES,
        json!({"Reading": [["Tolkien", "authors", 0]], "Reading.Queue": [["Dune", "series", 0]]}),
    )]);
    let (model, _rx) = model_for(store, source);
    model.rebuild().unwrap();
    let tree = model.tree();

    let reading = find_category_node(&tree, "@Reading").unwrap();
    assert_eq!(tree.parent(reading), Some(tree.root()));
    assert_eq!(child_names(&tree, reading), vec!["Queue", "Tolkien"]);
    let queue = find_category_node(&tree, "@Reading.Queue").unwrap();
    assert_eq!(tree.parent(queue), Some(reading));
    assert!(tree.node(queue).has(NodeFlag::Editable));
    assert_eq!(tree.node(queue).hierarchy, HierarchyMarker::FiveState);
    assert_eq!(child_names(&tree, queue), vec!["Dune"]);
    // members keep their source category
    let dune = tree.children(queue)[0];
    assert_eq!(tree.node(dune).value().unwrap().category, "series");
}

#[test]
fn test_states_survive_rebuild() {
    let (store, source) = sample_library(&[]);
    let (model, _rx) = model_for(store, source);
    model.rebuild().unwrap();
    let (tolkien, tags) = {
        let tree = model.tree();
        let tolkien = find_value(&tree, "authors", "Tolkien").unwrap();
        let tags = find_category_node(&tree, "tags").unwrap();
        (path_for(&tree, tolkien), path_for(&tree, tags))
    };
    assert!(model.toggle(&tolkien, false, None));
    assert!(model.toggle(&tags, false, Some(TagState::MarkMinus)));
    let expected = vec![r#"authors:"=Tolkien""#.to_string(), "tags:false".to_string()];
    assert_eq!(model.tokens(), expected);

    model.rebuild().unwrap();
    assert_eq!(model.tokens(), expected);
    let tree = model.tree();
    let restored = find_value(&tree, "authors", "Tolkien").unwrap();
    assert_eq!(tree.node(restored).state, TagState::MarkPlus);
}

#[test]
fn test_default_category_order_is_persisted() {
    let (store, source) = sample_library(&[]);
    let (model, _rx) = model_for(store.clone(), source);
    model.rebuild().unwrap();
    assert_eq!(
        store.get_pref(PREF_CATEGORY_ORDER).unwrap(),
        Some(json!(["authors", "series", "tags", "search", "#genre"]))
    );

    let (store, source) = sample_library(&[(PREF_DEFAULT_SORT, json!("lookup_name"))]);
    let (model, _rx) = model_for(store, source);
    model.rebuild().unwrap();
    assert_eq!(
        top_level_keys(&model.tree()),
        vec!["authors", "#genre", "search", "series", "tags"]
    );

    // A persisted order wins; unknown keys are ignored and missing ones follow
    let (store, source) = sample_library(&[(PREF_CATEGORY_ORDER, json!(["tags", "gone", "authors"]))]);
    let (model, _rx) = model_for(store, source);
    model.rebuild().unwrap();
    assert_eq!(
        top_level_keys(&model.tree()),
        vec!["tags", "authors", "series", "search", "#genre"]
    );
}
