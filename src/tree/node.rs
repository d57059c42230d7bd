use crate::{
    config::SearchOrderGraph,
    error::TagTreeError,
    properties::{
        BookId, EnumSet, HierarchyMarker, NodeFlag, TagState, ValueRecord, SEARCH_CATEGORY,
    },
    source::RatingMap,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter, Write},
};

/// Index of a node in its [TagTree]. Only meaningful for the tree that produced it; ids do not
/// survive a rebuild (use a [crate::tree::TreePath] for that).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryItem {
    /// Display name (a single segment for nested user categories)
    pub name: String,
    /// Full lookup key, `@Parent.Child` for nested user categories
    pub key: String,
    pub tooltip: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Root,
    Category(CategoryItem),
    Value(ValueRecord),
}

#[derive(Debug)]
pub struct TagNode {
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub kind: NodeKind,
    pub state: TagState,
    pub flags: EnumSet<NodeFlag>,
    pub hierarchy: HierarchyMarker,
    item_count: OnceCell<usize>,
    average_rating: OnceCell<f64>,
}

impl TagNode {
    fn new(kind: NodeKind, flags: EnumSet<NodeFlag>, hierarchy: HierarchyMarker) -> TagNode {
        TagNode {
            parent: None,
            children: Vec::new(),
            kind,
            state: TagState::Clear,
            flags,
            hierarchy,
            item_count: OnceCell::new(),
            average_rating: OnceCell::new(),
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_category(&self) -> bool {
        matches!(self.kind, NodeKind::Category(_))
    }

    pub fn is_value(&self) -> bool {
        matches!(self.kind, NodeKind::Value(_))
    }

    pub fn category(&self) -> Option<&CategoryItem> {
        match &self.kind {
            NodeKind::Category(item) => Some(item),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&ValueRecord> {
        match &self.kind {
            NodeKind::Value(record) => Some(record),
            _ => None,
        }
    }

    pub fn value_mut(&mut self) -> Option<&mut ValueRecord> {
        match &mut self.kind {
            NodeKind::Value(record) => Some(record),
            _ => None,
        }
    }

    pub fn has(&self, flag: NodeFlag) -> bool {
        self.flags.contains(flag)
    }

    pub fn is_temporary(&self) -> bool {
        self.has(NodeFlag::Temporary)
    }

    pub fn is_gst(&self) -> bool {
        self.has(NodeFlag::GroupedSearchTerm)
    }

    /// Display name: the category name, or the value name as [ValueRecord::display_name] picks
    /// it for this node's hierarchy marker.
    pub fn name(&self) -> &str {
        match &self.kind {
            NodeKind::Root => "",
            NodeKind::Category(item) => &item.name,
            NodeKind::Value(record) => {
                if record.use_sort_as_name {
                    record.sort_text()
                } else if self.hierarchy.is_hierarchical() {
                    &record.name
                } else {
                    &record.original_name
                }
            }
        }
    }

    /// Identifier used by named paths: `key:name` for categories, the original name for values.
    pub fn name_id(&self) -> String {
        match &self.kind {
            NodeKind::Root => String::new(),
            NodeKind::Category(item) => format!("{}:{}", item.key, item.name),
            NodeKind::Value(record) => record.original_name.clone(),
        }
    }

    /// Whether `state` may be landed on while advancing through the search order graph.
    fn accepts(&self, state: TagState) -> bool {
        match state {
            TagState::Clear => true,
            TagState::MarkPlus | TagState::MarkMinus => self.has(NodeFlag::Searchable),
            TagState::MarkPlusPlus | TagState::MarkMinusMinus => {
                self.has(NodeFlag::Searchable)
                    && !self.children.is_empty()
                    && self.hierarchy == HierarchyMarker::FiveState
            }
        }
    }
}

impl Display for TagNode {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match &self.kind {
            NodeKind::Root => write!(f, "<root>"),
            NodeKind::Category(item) => write!(f, "{} ({})", item.name, item.key),
            NodeKind::Value(record) => write!(f, "{}:{}", record.category, record.original_name),
        }
    }
}

/// Per category key, the toggle states of its values keyed by `(original_name, category)`.
/// Category nodes store their own state under the empty name and their key.
pub type StateMap = BTreeMap<String, BTreeMap<(String, String), TagState>>;

/// The node arena. Nodes are never freed individually; [TagTree::detach] unlinks a subtree and
/// the whole arena is dropped on rebuild.
#[derive(Debug)]
pub struct TagTree {
    nodes: Vec<TagNode>,
    root: NodeId,
}

impl Default for TagTree {
    fn default() -> Self {
        TagTree::new()
    }
}

impl TagTree {
    pub fn new() -> TagTree {
        TagTree {
            nodes: vec![TagNode::new(
                NodeKind::Root,
                EnumSet::empty(),
                HierarchyMarker::None,
            )],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn get(&self, id: NodeId) -> Option<&TagNode> {
        self.nodes.get(id.0)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut TagNode> {
        self.nodes.get_mut(id.0)
    }

    /// Direct access for ids handed out by this tree.
    pub fn node(&self, id: NodeId) -> &TagNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut TagNode {
        &mut self.nodes[id.0]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Create a category node under `parent`.
    pub fn add_category(
        &mut self,
        parent: NodeId,
        item: CategoryItem,
        flags: EnumSet<NodeFlag>,
    ) -> NodeId {
        let node = TagNode::new(NodeKind::Category(item), flags, HierarchyMarker::None);
        self.append(parent, node)
    }

    /// Create a value node under `parent`. Editable/searchable flags and the hierarchy marker are
    /// taken from the record.
    pub fn add_value(&mut self, parent: NodeId, record: ValueRecord, gst: bool) -> NodeId {
        let mut flags = EnumSet::empty();
        if record.is_editable {
            flags |= NodeFlag::Editable;
        }
        if record.is_searchable {
            flags |= NodeFlag::Searchable;
        }
        if gst {
            flags |= NodeFlag::GroupedSearchTerm;
        }
        let hierarchy = record.is_hierarchical;
        let node = TagNode::new(NodeKind::Value(record), flags, hierarchy);
        self.append(parent, node)
    }

    /// Append `child` as the last child of `parent` and link it back.
    pub fn append(&mut self, parent: NodeId, mut child: TagNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        child.parent = Some(parent);
        self.nodes.push(child);
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Unlink `id` from its parent and clear the parent links of the whole subtree.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
        let mut stack = self.nodes[id.0].children.clone();
        while let Some(child) = stack.pop() {
            self.nodes[child.0].parent = None;
            stack.extend(self.nodes[child.0].children.iter().copied());
        }
    }

    pub(crate) fn set_children(&mut self, id: NodeId, children: Vec<NodeId>) {
        for dropped in self.nodes[id.0]
            .children
            .clone()
            .into_iter()
            .filter(|c| !children.contains(c))
        {
            self.detach(dropped);
        }
        self.nodes[id.0].children = children;
    }

    /// Advance the toggle state of `id` (or set it to `set_to`). Returns the new state.
    ///
    /// When advancing, states the node cannot hold are skipped; landing on
    /// [TagState::Clear] always stops. A graph that never reaches an acceptable state ends at
    /// `Clear` once every state has been visited.
    pub fn toggle(
        &mut self,
        id: NodeId,
        set_to: Option<TagState>,
        graph: &SearchOrderGraph,
    ) -> TagState {
        let node = &mut self.nodes[id.0];
        match set_to {
            Some(state) => node.state = state,
            None => {
                let mut state = node.state;
                let mut steps = 0;
                loop {
                    state = graph.next(state);
                    steps += 1;
                    if node.accepts(state) {
                        break;
                    }
                    if steps > TagState::all().len() {
                        state = TagState::Clear;
                        break;
                    }
                }
                node.state = state;
            }
        }
        node.state
    }

    /// Every node below `id`, depth first in display order.
    pub fn all_children(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.collect_descendants(id, &mut out);
        out
    }

    fn collect_descendants(&self, id: NodeId, out: &mut Vec<NodeId>) {
        for child in self.children(id) {
            out.push(*child);
            self.collect_descendants(*child, out);
        }
    }

    /// Every value node below `id`, looking through temporary and nested category nodes.
    pub fn child_values(&self, id: NodeId) -> Vec<NodeId> {
        self.all_children(id)
            .into_iter()
            .filter(|c| self.node(*c).is_value())
            .collect()
    }

    /// The closest category node at or above `id`.
    pub fn category_of(&self, id: NodeId) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(candidate) = current {
            if self.node(candidate).is_category() {
                return Some(candidate);
            }
            current = self.parent(candidate);
        }
        None
    }

    /// The closest non-temporary category node at or above `id`.
    pub fn owning_category(&self, id: NodeId) -> Option<NodeId> {
        let mut current = self.category_of(id);
        while let Some(candidate) = current {
            if !self.node(candidate).is_temporary() {
                return Some(candidate);
            }
            current = self.parent(candidate).and_then(|p| self.category_of(p));
        }
        None
    }

    /// Top-level category nodes, in display order.
    pub fn top_level_categories(&self) -> &[NodeId] {
        self.children(self.root)
    }

    /// Union of the id-sets of `id` and every value below it.
    pub fn aggregate_ids(&self, id: NodeId) -> BTreeSet<BookId> {
        let mut ids = self
            .node(id)
            .value()
            .map(|r| r.id_set.clone())
            .unwrap_or_default();
        for child in self.child_values(id) {
            if let Some(record) = self.node(child).value() {
                ids.extend(record.id_set.iter().copied());
            }
        }
        ids
    }

    fn is_aggregate(&self, id: NodeId) -> bool {
        let node = self.node(id);
        node.hierarchy.is_hierarchical() && !node.children.is_empty()
    }

    /// Number of records a node stands for. Values that head a hierarchy count the distinct
    /// records of their whole subtree (computed once, then cached); categories count their
    /// values.
    pub fn item_count(&self, id: NodeId) -> usize {
        let node = self.node(id);
        match &node.kind {
            NodeKind::Root => 0,
            NodeKind::Category(_) => self.child_values(id).len(),
            NodeKind::Value(record) => {
                if !self.is_aggregate(id) {
                    record.count
                } else {
                    *node
                        .item_count
                        .get_or_init(|| self.aggregate_ids(id).len())
                }
            }
        }
    }

    /// Average rating of a value. Values that head a hierarchy report the rating computed for
    /// their subtree by [TagTree::compute_average_rating]; asking before it ran is an error.
    pub fn average_rating(&self, id: NodeId) -> Result<Option<f64>, TagTreeError> {
        let node = self.node(id);
        let record = match &node.kind {
            NodeKind::Value(record) => record,
            _ => return Ok(None),
        };
        if record.category == SEARCH_CATEGORY {
            Ok(None)
        } else if !self.is_aggregate(id) {
            Ok(record.avg_rating)
        } else {
            node.average_rating.get().map(|r| Some(*r)).ok_or_else(|| {
                TagTreeError::Uncomputed(format!("average rating of {}", node))
            })
        }
    }

    /// Average the ratings of the records below `id`, counting rated records only. Half-star
    /// ratings map to the 0..=5 scale. Unrated subtrees get 0.
    pub fn compute_average_rating(&mut self, id: NodeId, ratings: &RatingMap) {
        let rated = self
            .aggregate_ids(id)
            .into_iter()
            .filter_map(|book| ratings.get(&book).filter(|r| **r > 0))
            .map(|r| f64::from(*r) / 2.0)
            .collect::<Vec<_>>();
        let average = if rated.is_empty() {
            0.0
        } else {
            rated.iter().sum::<f64>() / rated.len() as f64
        };
        let node = &mut self.nodes[id.0];
        node.average_rating = OnceCell::new();
        // A fresh cell always accepts the value
        let _ = node.average_rating.set(average);
    }

    /// Capture toggle states so a rebuilt tree can restore them.
    pub fn state_map(&self) -> StateMap {
        let mut map = StateMap::new();
        for category in self.top_level_categories() {
            self.collect_states(*category, &mut map);
        }
        map
    }

    fn collect_states(&self, category: NodeId, map: &mut StateMap) {
        let key = match self.node(category).category() {
            Some(item) => item.key.clone(),
            None => return,
        };
        let node = self.node(category);
        if !node.state.is_clear() && !node.is_temporary() {
            map.entry(key.clone())
                .or_default()
                .insert((String::new(), key.clone()), node.state);
        }
        for child in self.children(category) {
            let child_node = self.node(*child);
            match &child_node.kind {
                NodeKind::Category(item) if item.key != key => self.collect_states(*child, map),
                NodeKind::Category(_) => self.collect_value_states(*child, &key, map),
                NodeKind::Value(_) => {
                    self.collect_value_state(*child, &key, map);
                    self.collect_value_states(*child, &key, map);
                }
                NodeKind::Root => {}
            }
        }
    }

    fn collect_value_states(&self, parent: NodeId, key: &str, map: &mut StateMap) {
        for child in self.all_children(parent) {
            self.collect_value_state(child, key, map);
        }
    }

    fn collect_value_state(&self, id: NodeId, key: &str, map: &mut StateMap) {
        let node = self.node(id);
        if let Some(record) = node.value() {
            if !node.state.is_clear() {
                map.entry(key.to_string()).or_default().insert(
                    (record.original_name.clone(), record.category.clone()),
                    node.state,
                );
            }
        }
    }

    /// Plain-text rendering, one node per line indented by depth:
    /// `name [count=N]` for categories and `name [count=N,rating=R]` for values.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_into(self.root, 0, &mut out);
        out
    }

    fn dump_into(&self, id: NodeId, depth: usize, out: &mut String) {
        for child in self.children(id) {
            let node = self.node(*child);
            let rating = match self.average_rating(*child) {
                Ok(Some(r)) if r > 0.0 => format!(",rating={r:.1}"),
                _ => String::new(),
            };
            // Writing to a String cannot fail
            let _ = writeln!(
                out,
                "{}{} [count={}{}]",
                "  ".repeat(depth),
                node.name(),
                self.item_count(*child),
                rating
            );
            self.dump_into(*child, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn category(tree: &mut TagTree, key: &str, flags: EnumSet<NodeFlag>) -> NodeId {
        let item = CategoryItem {
            name: key.to_string(),
            key: key.to_string(),
            tooltip: None,
        };
        tree.add_category(tree.root(), item, flags)
    }

    #[test]
    fn test_append_links_parent() {
        let mut tree = TagTree::new();
        let tags = category(&mut tree, "tags", NodeFlag::Searchable.into());
        let sf = tree.add_value(tags, ValueRecord::new("SF", "tags"), false);
        assert_eq!(tree.parent(sf), Some(tags));
        assert_eq!(tree.children(tags), &[sf]);
        assert_eq!(tree.category_of(sf), Some(tags));
    }

    #[test]
    fn test_detach_clears_parent_links() {
        let mut tree = TagTree::new();
        let tags = category(&mut tree, "tags", NodeFlag::Searchable.into());
        let a = tree.add_value(tags, ValueRecord::new("A", "tags"), false);
        let b = tree.add_value(a, ValueRecord::new("A.B", "tags"), false);
        tree.detach(a);
        assert!(tree.children(tags).is_empty());
        assert_eq!(tree.parent(a), None);
        assert_eq!(tree.parent(b), None);
    }

    #[test]
    fn test_toggle_skips_illegal_states() {
        let graph = SearchOrderGraph::default();
        let mut tree = TagTree::new();
        let tags = category(&mut tree, "tags", NodeFlag::Searchable.into());
        let leaf = tree.add_value(tags, ValueRecord::new("SF", "tags"), false);

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(tree.toggle(leaf, None, &graph));
        }
        assert_eq!(
            seen,
            vec![TagState::MarkPlus, TagState::MarkMinus, TagState::Clear]
        );

        let mut record = ValueRecord::new("Locked", "tags");
        record.is_searchable = false;
        let locked = tree.add_value(tags, record, false);
        assert_eq!(tree.toggle(locked, None, &graph), TagState::Clear);
    }

    #[test]
    fn test_toggle_visits_strict_states_on_five_state_parents() {
        let graph = SearchOrderGraph::default();
        let mut tree = TagTree::new();
        let tags = category(&mut tree, "tags", NodeFlag::Searchable.into());
        let mut record = ValueRecord::new("Fiction", "tags");
        record.is_hierarchical = HierarchyMarker::FiveState;
        let parent = tree.add_value(tags, record, false);
        tree.add_value(parent, ValueRecord::new("Fiction.SF", "tags"), false);

        let states = (0..5)
            .map(|_| tree.toggle(parent, None, &graph))
            .collect::<Vec<_>>();
        assert_eq!(
            states,
            vec![
                TagState::MarkPlus,
                TagState::MarkPlusPlus,
                TagState::MarkMinus,
                TagState::MarkMinusMinus,
                TagState::Clear
            ]
        );
    }

    #[test]
    fn test_toggle_cycle_without_legal_state_ends_clear() {
        let graph = SearchOrderGraph::new([
            (TagState::Clear, TagState::MarkPlusPlus),
            (TagState::MarkPlusPlus, TagState::MarkMinusMinus),
            (TagState::MarkMinusMinus, TagState::MarkPlusPlus),
        ]);
        let mut tree = TagTree::new();
        let tags = category(&mut tree, "tags", NodeFlag::Searchable.into());
        let leaf = tree.add_value(tags, ValueRecord::new("SF", "tags"), false);
        assert_eq!(tree.toggle(leaf, None, &graph), TagState::Clear);
    }

    #[test]
    fn test_aggregate_rating_requires_computation() {
        let mut tree = TagTree::new();
        let tags = category(&mut tree, "tags", NodeFlag::Searchable.into());
        let mut record = ValueRecord::new("Fiction", "tags").with_ids([1]);
        record.is_hierarchical = HierarchyMarker::FiveState;
        let parent = tree.add_value(tags, record, false);
        tree.add_value(parent, ValueRecord::new("Fiction.SF", "tags").with_ids([2, 3]), false);

        assert!(matches!(
            tree.average_rating(parent),
            Err(TagTreeError::Uncomputed(_))
        ));
        let ratings = RatingMap::from([(1, 8), (2, 0), (3, 4)]);
        tree.compute_average_rating(parent, &ratings);
        assert_eq!(tree.average_rating(parent).unwrap(), Some(3.0));
        assert_eq!(tree.item_count(parent), 3);
    }
}
