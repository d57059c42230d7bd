//! Tree construction.
//!
//! [TreeBuilder] turns the per-category value lists of a [CategoryData] into a [TagTree]:
//!
//! 1. one category node per field (user categories are split on `.` into nested nodes),
//! 2. values attached per category, optionally collapsed into partition or first-letter buckets,
//! 3. dotted names decomposed into chains of value nodes for hierarchical categories,
//! 4. aggregate ratings computed for every hierarchy head while the rating map is read,
//! 5. empty and hidden categories pruned and the top level put into display order.
//!
//! Nothing in here fails. Broken templates and odd data are recovered from and reported as
//! [BuildDiagnostic]s on the [BuiltTree].

use crate::{
    config::{CategoryDefaultSort, CollapseConfig, CollapseMode, SortDirection, TreeConfig},
    diagnostic::BuildDiagnostic,
    properties::{
        name_components, EnumSet, FieldMeta, HierarchyMarker, NodeFlag, SortOrder, TagState,
        ValueRecord, FLAT_CATEGORIES, NEWS_CATEGORY, RATED_CATEGORIES, READ_ONLY_CATEGORIES,
        SEARCH_CATEGORY, SEGMENT_SEPARATOR, USER_CATEGORY_PREFIX,
    },
    source::{CategoryData, CategorySource, RatingMap},
    tree::{
        interval::first_letter_labels,
        node::{CategoryItem, NodeId, StateMap, TagTree},
    },
};
use minijinja::{context, Environment, UndefinedBehavior};
use std::collections::{BTreeMap, BTreeSet};

const COLLAPSE_TEMPLATE: &str = "collapse";

/// Memoized lookups that live exactly as long as one tree. The owner resets it on every rebuild.
#[derive(Debug, Default)]
pub struct BuildCache {
    hierarchical: BTreeMap<String, bool>,
    notes: BTreeMap<String, BTreeSet<String>>,
    links: BTreeMap<String, BTreeMap<String, String>>,
}

impl BuildCache {
    pub fn new() -> BuildCache {
        BuildCache::default()
    }

    pub fn clear(&mut self) {
        self.hierarchical.clear();
        self.notes.clear();
        self.links.clear();
    }

    /// Whether values of `key` decompose on `.`. Never for the flat standard categories, only
    /// for categories the user enabled, and only while sorting by name.
    pub fn is_hierarchical_category(&mut self, key: &str, config: &TreeConfig) -> bool {
        *self.hierarchical.entry(key.to_string()).or_insert_with(|| {
            !FLAT_CATEGORIES.contains(&key)
                && config.categories_using_hierarchy.contains(key)
                && config.sort_by == SortOrder::Name
        })
    }

    pub fn has_notes(&mut self, source: &dyn CategorySource, category: &str, name: &str) -> bool {
        self.notes
            .entry(category.to_string())
            .or_insert_with(|| source.items_with_notes(category))
            .contains(name)
    }

    pub fn link_for(
        &mut self,
        source: &dyn CategorySource,
        category: &str,
        name: &str,
    ) -> Option<String> {
        self.links
            .entry(category.to_string())
            .or_insert_with(|| source.link_map(category))
            .get(name)
            .cloned()
    }
}

/// Result of one build.
#[derive(Debug)]
pub struct BuiltTree {
    pub tree: TagTree,
    /// Every category node that survived pruning, nested user categories included, in
    /// creation order.
    pub category_nodes: Vec<NodeId>,
    pub diagnostics: Vec<BuildDiagnostic>,
}

/// `shorten(left, middle, right)`: keep `left` leading and `right` trailing characters joined by
/// `middle`. Text that already fits is returned unchanged.
fn shorten(value: String, left: usize, middle: Option<String>, right: Option<usize>) -> String {
    let chars = value.chars().collect::<Vec<_>>();
    let middle = middle.unwrap_or_default();
    let right = right.unwrap_or(0);
    if chars.len() <= left + right + middle.chars().count() {
        return value;
    }
    let mut out = chars[..left].iter().collect::<String>();
    out.push_str(&middle);
    out.extend(&chars[chars.len() - right..]);
    out
}

/// `fixed(digits)`: fixed-point rendering; missing numbers render as zero.
fn fixed(value: Option<f64>, digits: Option<usize>) -> String {
    format!("{:.*}", digits.unwrap_or(2), value.unwrap_or(0.0))
}

fn collapse_templates(template: &str) -> Result<Environment<'static>, minijinja::Error> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_filter("shorten", shorten);
    env.add_filter("fixed", fixed);
    env.add_template_owned(COLLAPSE_TEMPLATE.to_string(), template.to_string())?;
    Ok(env)
}

/// `preferred` keys that exist, in preferred order, then the remaining `keys` in their order.
pub fn category_display_order(preferred: &[String], keys: &[String]) -> Vec<String> {
    let mut order = preferred
        .iter()
        .filter(|k| keys.contains(k))
        .cloned()
        .collect::<Vec<_>>();
    for key in keys {
        if !order.contains(key) {
            order.push(key.clone());
        }
    }
    order
}

/// Display order used when no order was ever persisted: metadata order, or sorted by display or
/// lookup name and then weighted by the ordering tweak.
pub fn default_category_order(config: &TreeConfig, fields: &[FieldMeta]) -> Vec<String> {
    let mut fields = fields.iter().collect::<Vec<_>>();
    if config.default_sort != CategoryDefaultSort::Default {
        let sort_key = |field: &FieldMeta| match config.default_sort {
            CategoryDefaultSort::DisplayName => field.name.to_lowercase(),
            _ => field
                .key
                .strip_prefix(['#', USER_CATEGORY_PREFIX])
                .unwrap_or(&field.key)
                .to_lowercase(),
        };
        match config.default_sort_direction {
            SortDirection::Ascending => fields.sort_by_key(|f| sort_key(*f)),
            SortDirection::Descending => fields.sort_by(|a, b| sort_key(*b).cmp(&sort_key(*a))),
        }
        let default_weight = config.tweak_order.get("*").copied().unwrap_or(1000);
        fields.sort_by_key(|f| {
            config
                .tweak_order
                .get(&f.key)
                .copied()
                .unwrap_or(default_weight)
        });
    }
    fields.into_iter().map(|f| f.key.clone()).collect()
}

pub struct TreeBuilder<'a> {
    config: &'a TreeConfig,
    collapse: CollapseConfig,
    cache: &'a mut BuildCache,
    templates: Result<Environment<'static>, String>,
    tree: TagTree,
    category_nodes: Vec<NodeId>,
    diagnostics: Vec<BuildDiagnostic>,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(config: &'a TreeConfig, cache: &'a mut BuildCache) -> TreeBuilder<'a> {
        let collapse = config.collapse();
        let templates = collapse_templates(&collapse.template).map_err(|e| e.to_string());
        TreeBuilder {
            config,
            collapse,
            cache,
            templates,
            tree: TagTree::new(),
            category_nodes: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Build the tree for `fields` (metadata order) from `data`. `order` is the top-level display
    /// order; categories missing from it are not shown. Toggle states are restored from
    /// `state_map`.
    pub fn build(
        mut self,
        fields: &[FieldMeta],
        data: &CategoryData,
        order: &[String],
        state_map: &StateMap,
        ratings: &RatingMap,
    ) -> BuiltTree {
        // Standard categories first: user categories list values the standard ones own
        let mut categories = fields
            .iter()
            .filter(|f| data.contains_key(&f.key) || f.is_user_category())
            .collect::<Vec<_>>();
        categories.sort_by_key(|f| f.is_user_category());
        self.add_categories(&categories, state_map);

        for category in self.category_nodes.clone() {
            let key = match self.tree.node(category).category() {
                Some(item) => item.key.clone(),
                None => continue,
            };
            let field = categories.iter().find(|f| f.key == key);
            if let (Some(field), Some(values)) = (field, data.get(&key)) {
                self.add_values(category, field, values, state_map.get(&key), ratings);
            }
        }

        self.prune(order);
        let tree = self.tree;
        let category_nodes = self
            .category_nodes
            .into_iter()
            .filter(|id| tree.parent(*id).is_some())
            .collect::<Vec<_>>();
        tracing::debug!(
            "Built tag tree: {} categories, {} nodes, {} diagnostics",
            category_nodes.len(),
            tree.len(),
            self.diagnostics.len()
        );
        BuiltTree {
            tree,
            category_nodes,
            diagnostics: self.diagnostics,
        }
    }

    fn is_gst_key(&self, key: &str) -> bool {
        key.strip_prefix(USER_CATEGORY_PREFIX)
            .map(|name| self.config.grouped_search_terms.contains_key(name))
            .unwrap_or(false)
    }

    fn add_categories(&mut self, fields: &[&FieldMeta], state_map: &StateMap) {
        let root = self.tree.root();
        let mut by_path: BTreeMap<String, NodeId> = BTreeMap::new();
        for field in fields {
            let key = field.key.as_str();
            let is_gst = self.is_gst_key(key);
            let tooltip = if is_gst {
                Some(format!("The grouped search term name is \"{key}\""))
            } else if key == NEWS_CATEGORY {
                None
            } else {
                let description = field
                    .description
                    .as_ref()
                    .filter(|d| field.is_custom && !d.is_empty())
                    .map(|d| format!("\nDescription: {d}"))
                    .unwrap_or_default();
                Some(format!("The lookup/search name is \"{key}\"{description}"))
            };

            if !field.is_user_category() {
                let mut flags = EnumSet::empty();
                if key != SEARCH_CATEGORY {
                    flags |= NodeFlag::Searchable;
                }
                if !READ_ONLY_CATEGORIES.contains(&key) {
                    flags |= NodeFlag::Editable;
                }
                let item = CategoryItem {
                    name: field.name.clone(),
                    key: key.to_string(),
                    tooltip,
                };
                let id = self.tree.add_category(root, item, flags);
                self.restore_category_state(id, key, state_map);
                by_path.insert(key.to_string(), id);
                self.category_nodes.push(id);
                continue;
            }

            let segments = key.split(SEGMENT_SEPARATOR).collect::<Vec<_>>();
            let mut parent = root;
            let mut path = String::new();
            for (i, segment) in segments.iter().enumerate() {
                if i > 0 {
                    path.push(SEGMENT_SEPARATOR);
                }
                path.push_str(segment);
                if let Some(existing) = by_path.get(&path) {
                    parent = *existing;
                    continue;
                }
                let name = if i == 0 {
                    segment.strip_prefix(USER_CATEGORY_PREFIX).unwrap_or(segment)
                } else {
                    segment
                };
                let mut flags = EnumSet::only(NodeFlag::Searchable);
                if is_gst {
                    flags |= NodeFlag::GroupedSearchTerm;
                } else if i == segments.len() - 1 {
                    flags |= NodeFlag::Editable;
                }
                let item = CategoryItem {
                    name: name.to_string(),
                    key: path.clone(),
                    tooltip: if path == key {
                        tooltip.clone()
                    } else {
                        Some(path.clone())
                    },
                };
                let id = self.tree.add_category(parent, item, flags);
                if !is_gst {
                    self.tree.node_mut(id).hierarchy = HierarchyMarker::FiveState;
                }
                self.restore_category_state(id, &path, state_map);
                by_path.insert(path.clone(), id);
                self.category_nodes.push(id);
                parent = id;
            }
        }
    }

    fn restore_category_state(&mut self, id: NodeId, key: &str, state_map: &StateMap) {
        if let Some(state) = state_map
            .get(key)
            .and_then(|states| states.get(&(String::new(), key.to_string())))
        {
            self.tree.node_mut(id).state = *state;
        }
    }

    /// Temporary bucket under `category`. Buckets share the category key.
    fn add_bucket(&mut self, category: NodeId, label: &str, searchable: bool) -> NodeId {
        let parent = self.tree.node(category);
        let key = parent
            .category()
            .map(|c| c.key.clone())
            .unwrap_or_default();
        let mut flags = EnumSet::only(NodeFlag::Temporary);
        if parent.is_gst() {
            flags |= NodeFlag::GroupedSearchTerm;
        }
        if searchable {
            flags |= NodeFlag::Searchable;
        }
        let item = CategoryItem {
            name: label.to_string(),
            key,
            tooltip: None,
        };
        self.tree.add_category(category, item, flags)
    }

    /// Render the label of the partition run `first..=last` and create its bucket. A template
    /// that fails to render leaves the run attached to the category itself.
    fn partition_bucket(
        &mut self,
        category: NodeId,
        hierarchical: bool,
        first: &ValueRecord,
        last: &ValueRecord,
        reported: &mut bool,
    ) -> NodeId {
        let template_record = |record: &ValueRecord| {
            let mut record = record.clone();
            if hierarchical {
                let top = name_components(&record.original_name)
                    .into_iter()
                    .next()
                    .unwrap_or_default();
                record.name = top.clone();
                record.sort = Some(top);
            } else if record.sort.is_none() {
                record.sort = Some(record.name.clone());
            }
            record
        };
        let first = template_record(first);
        let last = template_record(last);
        let rendered = match &self.templates {
            Ok(env) => env
                .get_template(COLLAPSE_TEMPLATE)
                .and_then(|t| t.render(context! { first => first, last => last }))
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.clone()),
        };
        match rendered {
            Ok(label) => self.add_bucket(category, &label, false),
            Err(message) => {
                if !*reported {
                    let key = self
                        .tree
                        .node(category)
                        .category()
                        .map(|c| c.key.clone())
                        .unwrap_or_default();
                    self.diagnostics
                        .push(BuildDiagnostic::template(key, message).logged());
                    *reported = true;
                }
                category
            }
        }
    }

    fn add_value(
        &mut self,
        parent: NodeId,
        record: ValueRecord,
        gst: bool,
        states: Option<&BTreeMap<(String, String), TagState>>,
    ) -> NodeId {
        let state = states
            .and_then(|s| s.get(&(record.original_name.clone(), record.category.clone())))
            .copied()
            .unwrap_or_default();
        let id = self.tree.add_value(parent, record, gst);
        self.tree.node_mut(id).state = state;
        id
    }

    /// Value child of `parent` named `segment` whose category (or grouped search term key) is
    /// `child_key`.
    fn find_child_value(
        &self,
        parent: NodeId,
        segment: &str,
        child_key: &str,
        gst_key: Option<&str>,
    ) -> Option<NodeId> {
        self.tree.children(parent).iter().copied().find(|c| {
            self.tree
                .node(*c)
                .value()
                .map(|r| r.name == segment && gst_key.unwrap_or(&r.category) == child_key)
                .unwrap_or(false)
        })
    }

    fn add_values(
        &mut self,
        category: NodeId,
        field: &FieldMeta,
        values: &[ValueRecord],
        states: Option<&BTreeMap<(String, String), TagState>>,
        ratings: &RatingMap,
    ) {
        if values.is_empty() {
            return;
        }
        let (key, is_gst) = {
            let node = self.tree.node(category);
            let key = node.category().map(|c| c.key.clone()).unwrap_or_default();
            (key, node.is_gst())
        };
        let top_key = key.split(SEGMENT_SEPARATOR).next().unwrap_or(&key);
        let mode = if self.config.dont_collapse.contains(top_key) {
            CollapseMode::Disabled
        } else {
            self.collapse.mode
        };
        let threshold = self.collapse.threshold;
        let collapsing = mode != CollapseMode::Disabled && values.len() > threshold;
        let clear_rating = !RATED_CATEGORIES.contains(&key.as_str())
            && !field.is_custom
            && !field.kind.is_user();
        let in_uc = field.kind.is_user() && !is_gst;
        let hierarchical = self.cache.is_hierarchical_category(&key, self.config);
        let letters = if collapsing && mode == CollapseMode::FirstLetter {
            first_letter_labels(
                values.iter().map(|v| v.sort_text()),
                self.collapse.first_letter_min,
            )
        } else {
            Vec::new()
        };
        let gst_key = is_gst.then_some(key.as_str());

        let mut top_level_component = format!("z{}", values[0].original_name);
        let mut last_partition: Option<usize> = None;
        let mut template_reported = false;
        let mut bucket = category;
        let mut bucket_letter: Option<&str> = None;
        let mut child_map: BTreeMap<(String, String), NodeId> = BTreeMap::new();

        for (idx, value) in values.iter().enumerate() {
            let mut tag = value.clone();
            if clear_rating {
                tag.avg_rating = None;
            }

            let mut node_parent = category;
            if collapsing {
                match mode {
                    CollapseMode::Partition => {
                        // Runs only break between top-level hierarchy segments
                        let due = last_partition
                            .map(|last| idx >= last + threshold)
                            .unwrap_or(true);
                        let inside_prefix = tag
                            .original_name
                            .starts_with(&format!("{top_level_component}{SEGMENT_SEPARATOR}"));
                        if due && !inside_prefix {
                            let last = (idx + threshold - 1).min(values.len() - 1);
                            bucket = self.partition_bucket(
                                category,
                                hierarchical,
                                &tag,
                                &values[last],
                                &mut template_reported,
                            );
                            last_partition = Some(idx);
                        }
                        node_parent = bucket;
                    }
                    CollapseMode::FirstLetter => {
                        let letter = letters[idx].as_str();
                        if bucket_letter != Some(letter) {
                            bucket_letter = Some(letter);
                            bucket = self.add_bucket(category, letter, key != SEARCH_CATEGORY);
                        }
                        node_parent = bucket;
                    }
                    CollapseMode::Disabled => {}
                }
            }

            let components = if hierarchical || tag.is_hierarchical.is_hierarchical() {
                name_components(&tag.original_name)
            } else {
                vec![tag.original_name.clone()]
            };
            let leaf = !tag.is_hierarchical.is_hierarchical()
                && (in_uc
                    || (field.is_custom && field.is_names)
                    || !hierarchical
                    || components.len() == 1);
            if leaf {
                // A later dotted name may still nest under this plain one
                if hierarchical && !in_uc && !(field.is_custom && field.is_names) {
                    top_level_component = components[0].clone();
                }
                let map_key = (tag.name.clone(), tag.category.clone());
                let id = self.add_value(node_parent, tag, is_gst, states);
                child_map.insert(map_key, id);
                continue;
            }

            let child_key = gst_key.unwrap_or(&tag.category).to_string();
            let marker = if tag.category == SEARCH_CATEGORY {
                HierarchyMarker::ThreeState
            } else {
                HierarchyMarker::FiveState
            };
            let last = components.len() - 1;
            for (i, segment) in components.iter().enumerate() {
                let existing = if i == 0 {
                    top_level_component = segment.clone();
                    child_map
                        .get(&(segment.clone(), child_key.clone()))
                        .copied()
                } else {
                    self.find_child_value(node_parent, segment, &child_key, gst_key)
                };
                if let Some(found) = existing {
                    let node = self.tree.node_mut(found);
                    node.hierarchy.upgrade(marker);
                    if let Some(record) = node.value_mut() {
                        record.id_set.extend(tag.id_set.iter().copied());
                    }
                    node_parent = found;
                    continue;
                }

                let mut record = tag.clone();
                if i < last {
                    record.original_name = components[..=i].join(".");
                    record.count = 0;
                    record.is_editable = false;
                    if key == SEARCH_CATEGORY {
                        record.is_searchable = false;
                        record.search_expression = None;
                    }
                } else if !in_uc {
                    record.original_name = record.name.clone();
                }
                record.is_hierarchical = marker;
                record.name = segment.clone();
                let id = self.add_value(node_parent, record, is_gst, states);
                if i == 0 {
                    child_map.insert((segment.clone(), child_key.clone()), id);
                }
                node_parent = id;
            }
        }

        for id in self.tree.child_values(category) {
            if self.tree.node(id).hierarchy.is_hierarchical() {
                self.tree.compute_average_rating(id, ratings);
            }
        }
    }

    fn category_key(&self, id: NodeId) -> String {
        self.tree
            .node(id)
            .category()
            .map(|c| c.key.clone())
            .unwrap_or_default()
    }

    fn prune_empty_user_categories(&mut self, parent: NodeId) {
        let mut kept = Vec::new();
        for child in self.tree.children(parent).to_vec() {
            let empty_user_category = self
                .tree
                .node(child)
                .category()
                .map(|c| c.key.starts_with(USER_CATEGORY_PREFIX))
                .unwrap_or(false)
                && self.tree.children(child).is_empty();
            if empty_user_category {
                continue;
            }
            kept.push(child);
            if self.tree.node(child).is_category() {
                self.prune_empty_user_categories(child);
            }
        }
        self.tree.set_children(parent, kept);
    }

    fn is_hidden(&self, key: &str) -> bool {
        let hidden = &self.config.hidden_categories;
        hidden.contains(key)
            || hidden.iter().any(|cat| {
                cat.starts_with(USER_CATEGORY_PREFIX)
                    && key.starts_with(&format!("{cat}{SEGMENT_SEPARATOR}"))
            })
    }

    fn prune(&mut self, order: &[String]) {
        let root = self.tree.root();
        let hide_empty = self.config.hide_empty_categories;
        if hide_empty {
            for top in self.tree.children(root).to_vec() {
                if self.category_key(top).starts_with(USER_CATEGORY_PREFIX) {
                    self.prune_empty_user_categories(top);
                }
            }
        }

        let mut kept = Vec::new();
        for top in self.tree.children(root).to_vec() {
            let key = self.category_key(top);
            if hide_empty && self.tree.child_values(top).is_empty() {
                continue;
            }
            if !order.contains(&key) || self.is_hidden(&key) {
                continue;
            }
            kept.push(top);
        }
        kept.sort_by_key(|id| {
            let key = self.category_key(*id);
            order.iter().position(|k| *k == key).unwrap_or(usize::MAX)
        });
        self.tree.set_children(root, kept);
    }
}
