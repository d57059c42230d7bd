//! Addressing nodes by position.
//!
//! Node ids die with their tree. Views hold [TreePath]s instead: the sibling ordinal of every
//! ancestor from the top-level category down to the node. Resolving a path is tolerant, since the
//! tree may have been rebuilt or edited since the path was captured.

use crate::tree::{
    node::{NodeId, TagTree},
    TreePath,
};

/// Ordinals from the top-level category down to `id`. The root has the empty path.
pub fn path_for(tree: &TagTree, id: NodeId) -> TreePath {
    let mut path = Vec::new();
    let mut current = id;
    while let Some(parent) = tree.parent(current) {
        match tree.children(parent).iter().position(|c| *c == current) {
            Some(row) => path.push(row),
            None => break,
        }
        current = parent;
    }
    path.reverse();
    path
}

/// Resolve `path`. When the last ordinal is out of range the previous sibling is used (the last
/// item was probably removed); any other miss stops at the deepest ancestor resolved so far.
/// `None` when not even the first step resolves.
pub fn node_for(tree: &TagTree, path: &[usize]) -> Option<NodeId> {
    let mut current = tree.root();
    for (depth, row) in path.iter().enumerate() {
        let children = tree.children(current);
        let fallback = || {
            (depth == path.len() - 1 && *row > 0)
                .then(|| children.get(*row - 1))
                .flatten()
        };
        match children.get(*row).or_else(fallback) {
            Some(child) => current = *child,
            None => break,
        }
    }
    (current != tree.root()).then_some(current)
}

/// Identifiers (see [crate::tree::TagNode::name_id]) from the top-level category down to `id`.
pub fn named_path_for(tree: &TagTree, id: NodeId) -> Vec<String> {
    let mut names = Vec::new();
    let mut current = id;
    while let Some(parent) = tree.parent(current) {
        names.push(tree.node(current).name_id());
        current = parent;
    }
    names.reverse();
    names
}

/// Resolve a named path, stopping at the deepest node found.
pub fn node_for_named_path(tree: &TagTree, names: &[String]) -> Option<NodeId> {
    let mut current = tree.root();
    for name in names {
        match tree
            .children(current)
            .iter()
            .find(|c| tree.node(**c).name_id() == *name)
        {
            Some(child) => current = *child,
            None => break,
        }
    }
    (current != tree.root()).then_some(current)
}

/// First non-temporary category node with `key`, depth first.
pub fn find_category_node(tree: &TagTree, key: &str) -> Option<NodeId> {
    let mut stack = tree.top_level_categories().iter().rev().copied().collect::<Vec<_>>();
    while let Some(id) = stack.pop() {
        let node = tree.node(id);
        if let Some(item) = node.category() {
            if item.key == key && !node.is_temporary() {
                return Some(id);
            }
            stack.extend(tree.children(id).iter().rev().copied());
        }
    }
    None
}

struct ItemFinder<'a> {
    tree: &'a TagTree,
    key: &'a str,
    text: String,
    equals: bool,
}

impl ItemFinder<'_> {
    fn matches(&self, name: &str) -> bool {
        if self.equals {
            name.to_lowercase() == self.text
        } else {
            name.to_lowercase().contains(&self.text)
        }
    }

    fn visit_value(&self, depth: usize, id: NodeId, start: &[usize]) -> Option<TreePath> {
        let path = path_for(self.tree, id);
        if depth < start.len() && path[depth] <= start[depth] {
            return None;
        }
        let record = self.tree.node(id).value()?;
        if self.matches(&record.original_name) {
            return Some(path);
        }
        self.tree
            .children(id)
            .iter()
            .find_map(|c| self.visit_value(depth + 1, *c, start))
    }

    fn visit_category(&self, depth: usize, id: NodeId, start: &[usize]) -> Option<TreePath> {
        let path = path_for(self.tree, id);
        let mut start = start.to_vec();
        if depth < start.len() {
            if path[depth] < start[depth] {
                return None;
            }
            if path[depth] > start[depth] {
                start = path.clone();
            }
        }
        let my_key = self.tree.node(id).category().map(|c| c.key.as_str());
        for child in self.tree.children(id) {
            let found = if self.tree.node(*child).is_category() {
                self.visit_category(depth + 1, *child, &start)
            } else if self.key.is_empty() || Some(self.key) == my_key {
                self.visit_value(depth + 1, *child, &start)
            } else {
                None
            };
            if found.is_some() {
                return found;
            }
        }
        None
    }
}

/// Next value (after `start`, in display order) in category `key` whose original name contains
/// `text`, or equals it with `equals`, ignoring case. An empty `key` searches every category.
pub fn find_item_node(
    tree: &TagTree,
    key: &str,
    text: &str,
    start: Option<&[usize]>,
    equals: bool,
) -> Option<TreePath> {
    if text.is_empty() {
        return None;
    }
    let finder = ItemFinder {
        tree,
        key,
        text: text.to_lowercase(),
        equals,
    };
    let start = start.unwrap_or(&[]);
    tree.top_level_categories()
        .iter()
        .find_map(|c| finder.visit_category(0, *c, start))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        properties::{EnumSet, NodeFlag, ValueRecord},
        tree::node::CategoryItem,
    };
    use test_log::test;

    fn tree() -> (TagTree, Vec<NodeId>) {
        let mut tree = TagTree::new();
        let mut ids = Vec::new();
        for key in ["authors", "tags"] {
            let item = CategoryItem {
                name: key.to_string(),
                key: key.to_string(),
                tooltip: None,
            };
            let category = tree.add_category(tree.root(), item, EnumSet::only(NodeFlag::Searchable));
            ids.push(category);
            for name in ["Adams", "Asimov", "Tolkien"] {
                ids.push(tree.add_value(category, ValueRecord::new(name, key), false));
            }
        }
        (tree, ids)
    }

    #[test]
    fn test_path_round_trip() {
        let (tree, ids) = tree();
        for id in ids {
            let path = path_for(&tree, id);
            assert_eq!(node_for(&tree, &path), Some(id));
            let named = named_path_for(&tree, id);
            assert_eq!(node_for_named_path(&tree, &named), Some(id));
        }
    }

    #[test]
    fn test_stale_paths_resolve_tolerantly() {
        let (mut tree, ids) = tree();
        let tolkien = ids[3];
        let asimov = ids[2];
        tree.detach(tolkien);
        // last step out of range falls back to the previous sibling
        assert_eq!(node_for(&tree, &[0, 2]), Some(asimov));
        // a miss above the last step stops at the deepest ancestor
        assert_eq!(node_for(&tree, &[0, 9, 0]), Some(ids[0]));
        assert_eq!(node_for(&tree, &[7]), None);
        assert_eq!(node_for(&tree, &[]), None);
    }

    #[test]
    fn test_find_item_node_continues_after_start() {
        let (tree, _) = tree();
        let first = find_item_node(&tree, "", "a", None, false).unwrap();
        assert_eq!(first, vec![0, 0]);
        let next = find_item_node(&tree, "", "a", Some(&first), false).unwrap();
        assert_eq!(next, vec![0, 1]);
        let in_tags = find_item_node(&tree, "tags", "tolkien", None, true).unwrap();
        assert_eq!(in_tags, vec![1, 2]);
        assert_eq!(find_item_node(&tree, "tags", "tolk", None, true), None);
    }

    #[test]
    fn test_find_category_node() {
        let (tree, ids) = tree();
        assert_eq!(find_category_node(&tree, "tags"), Some(ids[4]));
        assert_eq!(find_category_node(&tree, "series"), None);
    }
}
