//! The tag browser tree: an arena of [TagNode]s, the builder that fills it from category data,
//! first-letter interval merging and position based addressing.

pub mod builder;
pub mod interval;
pub mod node;
pub mod paths;

pub use builder::{BuildCache, BuiltTree, TreeBuilder};
pub use node::{CategoryItem, NodeId, NodeKind, StateMap, TagNode, TagTree};
pub use paths::{
    find_category_node, find_item_node, named_path_for, node_for, node_for_named_path, path_for,
};

/// Sibling ordinals from a top-level category down to a node. Stable across rebuilds as long as
/// the displayed structure is.
pub type TreePath = Vec<usize>;
