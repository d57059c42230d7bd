//! [TagsModel] owns the current tag tree and is the only thing that replaces or edits it.
//!
//! Views hold [TreePath]s and talk to the model through them. Every structural change goes
//! through [TagsModel::rebuild]: data is fetched from the [CategorySource], filtered, built into a
//! fresh [TagTree] without holding any lock, and swapped in between [TreeEvent::AboutToReset] and
//! [TreeEvent::ResetComplete]. Edits that persist something (renames, user categories, icons) are
//! validated first and return [TagTreeError::Rejected] with the tree untouched when they fail.

use crate::{
    config::{
        CollapseMode, PrefStore, PrefStoreExt, TreeConfig, PREF_CATEGORY_ORDER,
        PREF_USER_CATEGORIES,
    },
    diagnostic::BuildDiagnostic,
    error::TagTreeError,
    event::{EventSink, TreeEvent},
    icons::IconPrefs,
    properties::{
        BookId, FieldMeta, NodeFlag, TagState, SEARCH_CATEGORY, SEGMENT_SEPARATOR,
        USER_CATEGORY_PREFIX,
    },
    query::compose_tokens,
    source::{CategoryData, CategorySource},
    tree::{
        builder::{category_display_order, default_category_order},
        find_category_node, find_item_node, named_path_for, node_for, node_for_named_path,
        path_for, BuildCache, NodeId, TagTree, TreeBuilder, TreePath,
    },
    user_categories::UserCategories,
};
use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

const BLANK_ITEM: &str = "An item cannot be set to nothing. Delete it instead.";
const AUTHOR_AMPERSAND: &str = "Author names cannot contain & characters.";
const USER_CATEGORY_PERIOD: &str =
    "You cannot use periods in the name when renaming User categories";
/// Standard categories whose values can be assigned to dropped records.
const RECORD_DROP_CATEGORIES: &[&str] =
    &["authors", "series", "tags", "publisher", "rating", "languages"];

/// Clears the build flag on every exit path of a rebuild.
struct BuildGuard<'a>(&'a AtomicBool);

impl<'a> BuildGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<BuildGuard<'a>> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| BuildGuard(flag))
    }
}

impl Drop for BuildGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct ModelState {
    tree: TagTree,
    category_nodes: Vec<NodeId>,
    fields: Vec<FieldMeta>,
    config: TreeConfig,
    diagnostics: Vec<BuildDiagnostic>,
}

/// The node at `path`, only if the path still points at exactly that position.
fn resolve(tree: &TagTree, path: &[usize]) -> Option<NodeId> {
    node_for(tree, path).filter(|id| path_for(tree, *id) == path)
}

fn category_key(tree: &TagTree, id: NodeId) -> Option<&str> {
    tree.node(id).category().map(|c| c.key.as_str())
}

/// Whether the node at `path` sits in a user category (grouped search terms excluded).
fn in_user_category(tree: &TagTree, path: &[usize]) -> bool {
    resolve(tree, path)
        .and_then(|id| tree.owning_category(id))
        .map(|c| {
            !tree.node(c).is_gst()
                && category_key(tree, c)
                    .map(|k| k.starts_with(USER_CATEGORY_PREFIX))
                    .unwrap_or(false)
        })
        .unwrap_or(false)
}

/// Keep the values whose name contains `filter` (already lower case), or equals it when the
/// filter starts with `=`. Both comparisons ignore case.
fn filter_values(data: &mut CategoryData, filter: &str) {
    let (exact, text) = match filter.strip_prefix('=') {
        Some(text) => (true, text),
        None => (false, filter),
    };
    for values in data.values_mut() {
        values.retain(|v| {
            let name = v.name.to_lowercase();
            if exact {
                name == text
            } else {
                name.contains(text)
            }
        });
    }
}

pub struct TagsModel {
    source: Arc<dyn CategorySource>,
    prefs: Arc<dyn PrefStore>,
    events: EventSink,
    state: RwLock<ModelState>,
    cache: Mutex<BuildCache>,
    filter: RwLock<Option<String>>,
    in_tag_browser: RwLock<Option<BTreeSet<BookId>>>,
    building: AtomicBool,
}

impl TagsModel {
    /// A model with an empty tree. Call [TagsModel::rebuild] to populate it.
    pub fn new(
        source: Arc<dyn CategorySource>,
        prefs: Arc<dyn PrefStore>,
        events: EventSink,
    ) -> TagsModel {
        TagsModel {
            source,
            prefs,
            events,
            state: RwLock::new(ModelState::default()),
            cache: Mutex::new(BuildCache::new()),
            filter: RwLock::new(None),
            in_tag_browser: RwLock::new(None),
            building: AtomicBool::new(false),
        }
    }

    pub fn tree(&self) -> MappedRwLockReadGuard<'_, TagTree> {
        RwLockReadGuard::map(self.state.read(), |s| &s.tree)
    }

    /// Every category node of the current tree, nested user categories included.
    pub fn category_nodes(&self) -> Vec<NodeId> {
        self.state.read().category_nodes.clone()
    }

    pub fn fields(&self) -> Vec<FieldMeta> {
        self.state.read().fields.clone()
    }

    pub fn config(&self) -> TreeConfig {
        self.state.read().config.clone()
    }

    /// Diagnostics of the last completed build.
    pub fn diagnostics(&self) -> Vec<BuildDiagnostic> {
        self.state.read().diagnostics.clone()
    }

    pub fn is_building(&self) -> bool {
        self.building.load(Ordering::SeqCst)
    }

    /// Show only values whose name contains `filter` (ignoring case), or equals it when it starts
    /// with `=`. Takes effect on the next rebuild.
    pub fn set_categories_filter(&self, filter: Option<&str>) {
        *self.filter.write() = filter.filter(|f| !f.is_empty()).map(str::to_lowercase);
    }

    pub fn categories_filter(&self) -> Option<String> {
        self.filter.read().clone()
    }

    /// Records shown by the filtered tree; `None` while no filter is active.
    pub fn in_tag_browser(&self) -> Option<BTreeSet<BookId>> {
        self.in_tag_browser.read().clone()
    }

    fn fetch(
        &self,
        config: &TreeConfig,
        diagnostics: &mut Vec<BuildDiagnostic>,
    ) -> Result<CategoryData, TagTreeError> {
        let first_letter = config.partition_method == CollapseMode::FirstLetter;
        let restriction = self.source.restricted_book_ids();
        match self.source.get_categories(
            config.sort_by,
            restriction.as_ref(),
            first_letter,
            &config.dont_collapse,
        ) {
            Ok(data) => Ok(data),
            Err(e) => {
                diagnostics.push(BuildDiagnostic::Restriction(e.to_string()).logged());
                self.events.emit(TreeEvent::RestrictionError(e.to_string()));
                self.source.get_categories(
                    config.sort_by,
                    None,
                    first_letter,
                    &config.dont_collapse,
                )
            }
        }
    }

    /// Top-level display order. Without a persisted order the default-sort tweaks decide, and
    /// the result is persisted so later builds (and the user) start from it.
    fn display_order(
        &self,
        config: &TreeConfig,
        fields: &[FieldMeta],
        data: &CategoryData,
        diagnostics: &mut Vec<BuildDiagnostic>,
    ) -> Vec<String> {
        let shown = fields
            .iter()
            .filter(|f| data.contains_key(&f.key) || f.is_user_category())
            .cloned()
            .collect::<Vec<_>>();
        let keys = shown.iter().map(|f| f.key.clone()).collect::<Vec<_>>();
        match &config.category_order {
            Some(preferred) => category_display_order(preferred, &keys),
            None => {
                let order = category_display_order(&default_category_order(config, &shown), &keys);
                if let Err(e) = self.prefs.set_typed(PREF_CATEGORY_ORDER, &order) {
                    diagnostics.push(
                        BuildDiagnostic::configuration(PREF_CATEGORY_ORDER, e.to_string()).logged(),
                    );
                }
                order
            }
        }
    }

    /// Report user category entries that point at categories the source doesn't have. Those
    /// entries are left out of the tree.
    fn check_user_categories(
        &self,
        fields: &[FieldMeta],
        diagnostics: &mut Vec<BuildDiagnostic>,
    ) {
        let ucs = match UserCategories::load(self.prefs.as_ref()) {
            Ok(ucs) => ucs,
            Err(e) => {
                diagnostics.push(
                    BuildDiagnostic::configuration(PREF_USER_CATEGORIES, e.to_string()).logged(),
                );
                return;
            }
        };
        for (name, entries) in ucs.iter() {
            let unknown = entries
                .iter()
                .map(|e| e.category.as_str())
                .filter(|c| fields.iter().all(|f| f.key != *c))
                .collect::<BTreeSet<_>>();
            for category in unknown {
                diagnostics.push(
                    BuildDiagnostic::DataConsistency(format!(
                        "user category '{name}' lists values of unknown category '{category}'"
                    ))
                    .logged(),
                );
            }
        }
    }

    /// Replace the tree with a fresh build from the source. Toggle states survive by
    /// `(original_name, category)`. A call made while another rebuild runs is dropped and
    /// reported as [BuildDiagnostic::Reentrancy].
    #[tracing::instrument(skip_all)]
    pub fn rebuild(&self) -> Result<Vec<BuildDiagnostic>, TagTreeError> {
        let _guard = match BuildGuard::acquire(&self.building) {
            Some(guard) => guard,
            None => return Ok(vec![BuildDiagnostic::Reentrancy.logged()]),
        };
        let mut diagnostics = Vec::new();
        let config = TreeConfig::load(self.prefs.as_ref(), &mut diagnostics);
        let state_map = self.state.read().tree.state_map();
        let fields = self.source.field_metadata();
        self.check_user_categories(&fields, &mut diagnostics);
        let mut data = self.fetch(&config, &mut diagnostics)?;
        if let Some(filter) = self.filter.read().as_deref() {
            filter_values(&mut data, filter);
        }
        let order = self.display_order(&config, &fields, &data, &mut diagnostics);

        self.events.emit(TreeEvent::AboutToReset);
        let built = {
            let ratings = self.source.rating_map();
            let ratings = ratings.read();
            let mut cache = self.cache.lock();
            cache.clear();
            TreeBuilder::new(&config, &mut cache).build(&fields, &data, &order, &state_map, &ratings)
        };
        diagnostics.extend(built.diagnostics);
        {
            let mut state = self.state.write();
            *state = ModelState {
                tree: built.tree,
                category_nodes: built.category_nodes,
                fields,
                config,
                diagnostics: diagnostics.clone(),
            };
        }
        self.events.emit(TreeEvent::ResetComplete);
        tracing::debug!("Tag browser rebuilt with {} diagnostics", diagnostics.len());

        if self.set_in_tag_browser() {
            self.events.emit(TreeEvent::ResearchRequired);
        }
        Ok(diagnostics)
    }

    /// Record the ids shown by a filtered tree. Returns whether they changed.
    fn set_in_tag_browser(&self) -> bool {
        let ids = if self.filter.read().is_some() {
            let state = self.state.read();
            let tree = &state.tree;
            let mut ids = BTreeSet::new();
            for top in tree.top_level_categories() {
                let node = tree.node(*top);
                if node.is_gst() || category_key(tree, *top) == Some(SEARCH_CATEGORY) {
                    continue;
                }
                for value in tree.child_values(*top) {
                    if let Some(record) = tree.node(value).value() {
                        ids.extend(record.id_set.iter().copied());
                    }
                }
            }
            Some(ids)
        } else {
            None
        };
        let mut current = self.in_tag_browser.write();
        let changed = *current != ids;
        *current = ids;
        changed
    }

    /// Search clauses for the marked nodes, in display order.
    pub fn tokens(&self) -> Vec<String> {
        let state = self.state.read();
        let first_letter = state.config.collapse().mode == CollapseMode::FirstLetter;
        compose_tokens(&state.tree, &state.category_nodes, &state.fields, first_letter)
    }

    pub fn dump(&self) -> String {
        self.state.read().tree.dump()
    }

    fn emit_changed(&self, paths: Vec<TreePath>) {
        for path in paths {
            self.events.emit(TreeEvent::NodeDataChanged(path));
        }
    }

    /// Advance (or set) the toggle state of the node at `path`. With `exclusive`, every other
    /// mark is cleared. Returns false when the path is stale or the node cannot be marked.
    pub fn toggle(&self, path: &[usize], exclusive: bool, set_to: Option<TagState>) -> bool {
        let changed = {
            let mut state = self.state.write();
            let graph = state.config.search_order.clone();
            let tree = &mut state.tree;
            let id = match resolve(tree, path) {
                Some(id) => id,
                None => return false,
            };
            if let Some(record) = tree.node(id).value() {
                if record.category == SEARCH_CATEGORY && record.search_expression.is_none() {
                    return false;
                }
            }
            let new_state = tree.toggle(id, set_to, &graph);
            tracing::debug!("Toggled {} to {}", tree.node(id), new_state);
            let mut changed = vec![path.to_vec()];
            if exclusive {
                changed.extend(Self::clear_states(tree, Some(id)));
            }
            changed
        };
        self.emit_changed(changed);
        true
    }

    fn clear_states(tree: &mut TagTree, except: Option<NodeId>) -> Vec<TreePath> {
        let mut changed = Vec::new();
        for id in tree.all_children(tree.root()) {
            if Some(id) != except && !tree.node(id).state.is_clear() {
                tree.node_mut(id).state = TagState::Clear;
                changed.push(path_for(tree, id));
            }
        }
        changed
    }

    /// Clear every mark in the tree.
    pub fn reset_all_states(&self) {
        let changed = Self::clear_states(&mut self.state.write().tree, None);
        self.emit_changed(changed);
    }

    /// Highlight the node at `path` (a find result).
    pub fn set_boxed(&self, path: &[usize]) -> bool {
        {
            let mut state = self.state.write();
            let id = match resolve(&state.tree, path) {
                Some(id) => id,
                None => return false,
            };
            state.tree.node_mut(id).flags |= NodeFlag::Boxed;
        }
        self.emit_changed(vec![path.to_vec()]);
        true
    }

    pub fn clear_boxed(&self) {
        let changed = {
            let mut state = self.state.write();
            let tree = &mut state.tree;
            let mut changed = Vec::new();
            for id in tree.all_children(tree.root()) {
                if tree.node(id).has(NodeFlag::Boxed) {
                    tree.node_mut(id).flags.remove(NodeFlag::Boxed);
                    changed.push(path_for(tree, id));
                }
            }
            changed
        };
        self.emit_changed(changed);
    }

    pub fn node_for_path(&self, path: &[usize]) -> Option<NodeId> {
        node_for(&self.state.read().tree, path)
    }

    pub fn named_path(&self, path: &[usize]) -> Option<Vec<String>> {
        let state = self.state.read();
        resolve(&state.tree, path).map(|id| named_path_for(&state.tree, id))
    }

    pub fn path_for_named(&self, names: &[String]) -> Option<TreePath> {
        let state = self.state.read();
        node_for_named_path(&state.tree, names).map(|id| path_for(&state.tree, id))
    }

    /// Next value after `start` matching `text`; see [crate::tree::find_item_node].
    pub fn find_item_node(
        &self,
        key: &str,
        text: &str,
        start: Option<&[usize]>,
        equals: bool,
    ) -> Option<TreePath> {
        find_item_node(&self.state.read().tree, key, text, start, equals)
    }

    pub fn find_category_node(&self, key: &str) -> Option<TreePath> {
        let state = self.state.read();
        find_category_node(&state.tree, key).map(|id| path_for(&state.tree, id))
    }

    /// Whether values of `key` decompose into hierarchies under the current configuration.
    pub fn is_hierarchical_category(&self, key: &str) -> bool {
        let state = self.state.read();
        self.cache.lock().is_hierarchical_category(key, &state.config)
    }

    /// Whether the node at `path` sits inside a (non grouped search term) user category.
    pub fn is_in_user_category(&self, path: &[usize]) -> bool {
        in_user_category(&self.state.read().tree, path)
    }

    /// Whether records dropped on the node at `path` can be assigned its value.
    pub fn accepts_record_drop(&self, path: &[usize]) -> bool {
        let state = self.state.read();
        let tree = &state.tree;
        let record = match resolve(tree, path).and_then(|id| tree.node(id).value()) {
            Some(record) => record,
            None => return false,
        };
        if in_user_category(tree, path) {
            return false;
        }
        state
            .fields
            .iter()
            .find(|f| f.key == record.category)
            .map(|f| {
                RECORD_DROP_CATEGORIES.contains(&f.key.as_str())
                    || (f.is_custom && f.kind.accepts_record_drop())
            })
            .unwrap_or(false)
    }

    pub fn item_has_note(&self, category: &str, name: &str) -> bool {
        self.cache.lock().has_notes(self.source.as_ref(), category, name)
    }

    pub fn item_link(&self, category: &str, name: &str) -> Option<String> {
        self.cache.lock().link_for(self.source.as_ref(), category, name)
    }

    /// `(id, original_name, count)` of every value of top-level category `key` that is used by at
    /// least one record.
    pub fn category_editor_data(&self, key: &str) -> Vec<(Option<u64>, String, usize)> {
        let state = self.state.read();
        let tree = &state.tree;
        tree.top_level_categories()
            .iter()
            .filter(|c| category_key(tree, **c) == Some(key))
            .flat_map(|c| tree.child_values(*c))
            .filter_map(|v| tree.node(v).value())
            .filter(|r| r.count > 0)
            .map(|r| (r.id, r.original_name.clone(), r.count))
            .collect()
    }

    pub fn icon_prefs(&self) -> Result<IconPrefs, TagTreeError> {
        IconPrefs::load(self.prefs.as_ref())
    }

    pub fn save_icon_prefs(&self, icons: &IconPrefs) -> Result<(), TagTreeError> {
        icons.save(self.prefs.as_ref())
    }

    /// Apply an edit of the displayed name at `path`: renames a user category, a saved search or
    /// a value depending on what is there.
    pub fn set_name(&self, path: &[usize], value: &str) -> Result<(), TagTreeError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(TagTreeError::rejected(BLANK_ITEM));
        }
        let user_category = {
            let state = self.state.read();
            let id = resolve(&state.tree, path)
                .ok_or_else(|| TagTreeError::NotFound(format!("node at {path:?}")))?;
            category_key(&state.tree, id)
                .filter(|k| k.starts_with(USER_CATEGORY_PREFIX))
                .map(String::from)
        };
        match user_category {
            Some(key) => self.rename_user_category(&key, value),
            None => self.rename_item(path, value, false),
        }
    }

    /// Rename the value at `path` to `new_name`. A value heading a hierarchy renames its
    /// descendants too (`Fiction.SF` follows `Fiction -> Novels` to `Novels.SF`), icons and user
    /// category members follow the rename. With `restrict_to_view` only records of the current
    /// restriction are touched.
    pub fn rename_item(
        &self,
        path: &[usize],
        new_name: &str,
        restrict_to_view: bool,
    ) -> Result<(), TagTreeError> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(TagTreeError::rejected(BLANK_ITEM));
        }
        let (category, renames) = {
            let mut state = self.state.write();
            let id = resolve(&state.tree, path)
                .ok_or_else(|| TagTreeError::NotFound(format!("node at {path:?}")))?;
            let tree = &state.tree;
            let node = tree.node(id);
            let record = node
                .value()
                .ok_or_else(|| TagTreeError::NotFound(format!("value at {path:?}")))?;
            let category = record.category.clone();
            if state.fields.iter().all(|f| f.key != category) {
                return Err(TagTreeError::NotFound(format!("category '{category}'")));
            }
            if category == "authors" && new_name.contains('&') {
                return Err(TagTreeError::rejected(AUTHOR_AMPERSAND));
            }
            if category == SEARCH_CATEGORY {
                let old_name = record.original_name.clone();
                drop(state);
                return self.rename_saved_search(&old_name, new_name);
            }

            let old_name = record.original_name.clone();
            let children = tree.all_children(id);
            let mut renames = Vec::new();
            if node.has(NodeFlag::Editable) && children.is_empty() {
                renames.push((old_name, new_name.to_string()));
            } else {
                if node.has(NodeFlag::Editable) {
                    renames.push((old_name.clone(), new_name.to_string()));
                }
                let prefix = format!("{old_name}{SEGMENT_SEPARATOR}");
                for child in children {
                    let child_node = tree.node(child);
                    if let Some(child_record) = child_node.value() {
                        if child_node.has(NodeFlag::Editable)
                            && child_record.original_name.starts_with(&prefix)
                        {
                            let rest = &child_record.original_name[old_name.len()..];
                            renames.push((
                                child_record.original_name.clone(),
                                format!("{new_name}{rest}"),
                            ));
                        }
                    }
                }
                if let Some(parent) = tree.parent(id).filter(|p| tree.node(*p).is_value()) {
                    state.tree.node_mut(parent).state = TagState::Clear;
                }
            }
            (category, renames)
        };

        let restriction = if restrict_to_view {
            self.source.restricted_book_ids()
        } else {
            None
        };
        let mut icons = self.icon_prefs()?;
        let mut ucs = UserCategories::load(self.prefs.as_ref())?;
        // Preferences and the tree follow whatever the source managed to rename
        let mut failure = None;
        for (old_name, new_name) in renames.iter() {
            if let Err(e) =
                self.source
                    .rename_item(&category, old_name, new_name, restriction.as_ref())
            {
                tracing::warn!("Renaming {category}:{old_name} failed: {e}");
                failure = Some(e);
                break;
            }
            icons.rename_value(&category, old_name, new_name);
            if restriction.is_some() {
                ucs.add_renamed_item(&category, old_name, new_name);
            } else {
                ucs.rename_globally(old_name, &category, new_name);
            }
            tracing::info!("Renamed {category}:{old_name} to {new_name}");
        }
        self.prune_user_categories(&mut ucs);
        ucs.save(self.prefs.as_ref())?;
        icons.save(self.prefs.as_ref())?;
        self.rebuild()?;
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn rename_saved_search(&self, old_name: &str, new_name: &str) -> Result<(), TagTreeError> {
        if old_name == new_name {
            return Ok(());
        }
        if self.source.saved_search_names().iter().any(|n| n == new_name) {
            return Err(TagTreeError::rejected(format!(
                "The saved search name {new_name} is already used."
            )));
        }
        self.source.rename_saved_search(old_name, new_name)?;
        tracing::info!("Renamed saved search {old_name} to {new_name}");
        self.rebuild()?;
        Ok(())
    }

    /// Drop user category members whose value no longer exists on any record.
    fn prune_user_categories(&self, ucs: &mut UserCategories) -> usize {
        let fields = self.source.field_metadata();
        ucs.prune_dangling(
            |category| {
                fields
                    .iter()
                    .any(|f| f.key == category && f.kind.is_resolvable())
            },
            |category, name| !self.source.books_for_item(category, name).is_empty(),
        )
    }

    /// Give user category `key` (`@Parent.Name`) the last segment `new_segment`. Nested user
    /// categories move along. Nothing changes when any resulting name collides, ignoring case,
    /// with an existing user category.
    pub fn rename_user_category(&self, key: &str, new_segment: &str) -> Result<(), TagTreeError> {
        let new_segment = new_segment.trim();
        if new_segment.is_empty() {
            return Err(TagTreeError::rejected(BLANK_ITEM));
        }
        if new_segment.contains(SEGMENT_SEPARATOR) {
            return Err(TagTreeError::rejected(USER_CATEGORY_PERIOD));
        }
        let old = key.strip_prefix(USER_CATEGORY_PREFIX).unwrap_or(key);
        let new = match old.rsplit_once(SEGMENT_SEPARATOR) {
            Some((parent, _)) => format!("{parent}{SEGMENT_SEPARATOR}{new_segment}"),
            None => new_segment.to_string(),
        };
        if old == new {
            return Ok(());
        }
        let mut ucs = UserCategories::load(self.prefs.as_ref())?;
        if !ucs.contains_key(old) {
            return Err(TagTreeError::NotFound(format!("user category '{old}'")));
        }
        if old.to_lowercase() != new.to_lowercase() {
            let prefix = format!("{old}{SEGMENT_SEPARATOR}");
            for existing in ucs.keys().filter(|k| *k == old || k.starts_with(&prefix)) {
                let renamed = format!("{new}{}", &existing[old.len()..]);
                if ucs.find_ignoring_case(&renamed).is_some() {
                    return Err(TagTreeError::rejected(format!(
                        "The name {renamed} is already used"
                    )));
                }
            }
        }

        ucs.rename_category(old, &new)?;
        let mut icons = self.icon_prefs()?;
        icons.rename_category(
            &format!("{USER_CATEGORY_PREFIX}{old}"),
            &format!("{USER_CATEGORY_PREFIX}{new}"),
        );
        ucs.save(self.prefs.as_ref())?;
        icons.save(self.prefs.as_ref())?;
        tracing::info!("Renamed user category {old} to {new}");
        self.events.emit(TreeEvent::UserCategoryChanged);
        self.rebuild()?;
        Ok(())
    }

    fn commit_user_categories(&self, ucs: &UserCategories) -> Result<(), TagTreeError> {
        ucs.save(self.prefs.as_ref())?;
        self.events.emit(TreeEvent::UserCategoryChanged);
        self.rebuild()?;
        Ok(())
    }

    /// Copy the values at `paths` (with their hierarchical descendants) into `user_category`.
    pub fn add_values_to_user_category(
        &self,
        user_category: &str,
        paths: &[TreePath],
    ) -> Result<bool, TagTreeError> {
        let name = user_category
            .strip_prefix(USER_CATEGORY_PREFIX)
            .unwrap_or(user_category);
        let mut ucs = UserCategories::load(self.prefs.as_ref())?;
        if !ucs.contains_key(name) {
            return Err(TagTreeError::NotFound(format!("user category '{name}'")));
        }
        let changed = {
            let state = self.state.read();
            let items = paths
                .iter()
                .filter_map(|p| resolve(&state.tree, p))
                .filter(|id| state.tree.node(*id).is_value())
                .collect::<Vec<_>>();
            ucs.move_or_copy(&state.tree, &items, name, false)
        };
        if changed {
            self.commit_user_categories(&ucs)?;
        }
        Ok(changed)
    }

    pub fn delete_item_from_user_category(
        &self,
        user_category: &str,
        name: &str,
        category: &str,
    ) -> Result<bool, TagTreeError> {
        let mut ucs = UserCategories::load(self.prefs.as_ref())?;
        let changed = ucs.remove_entry(user_category, name, category);
        if changed {
            tracing::info!("Removed {category}:{name} from user category {user_category}");
            self.commit_user_categories(&ucs)?;
        }
        Ok(changed)
    }

    pub fn delete_item_from_all_user_categories(
        &self,
        name: &str,
        category: &str,
    ) -> Result<bool, TagTreeError> {
        let mut ucs = UserCategories::load(self.prefs.as_ref())?;
        let changed = ucs.delete_globally(name, category);
        if changed {
            tracing::info!("Removed {category}:{name} from every user category");
            self.commit_user_categories(&ucs)?;
        }
        Ok(changed)
    }

    /// List `new_name` beside `original_name` in every user category holding the latter.
    pub fn add_renamed_item_to_user_categories(
        &self,
        category: &str,
        original_name: &str,
        new_name: &str,
    ) -> Result<bool, TagTreeError> {
        let mut ucs = UserCategories::load(self.prefs.as_ref())?;
        let changed = ucs.add_renamed_item(category, original_name, new_name);
        if changed {
            self.commit_user_categories(&ucs)?;
        }
        Ok(changed)
    }

    /// Remove user category members that no longer resolve to a record. Returns how many went.
    pub fn clean_user_categories(&self) -> Result<usize, TagTreeError> {
        let mut ucs = UserCategories::load(self.prefs.as_ref())?;
        let removed = self.prune_user_categories(&mut ucs);
        if removed > 0 {
            self.commit_user_categories(&ucs)?;
        }
        Ok(removed)
    }

    /// Handle values dragged from `sources` onto `destination`.
    ///
    /// A single value of a hierarchical category dropped on a value of the same category (or on
    /// the category itself) is re-parented by renaming it. Anything else dropped on a user category
    /// is copied into it, or moved with `is_move`. Returns whether anything changed.
    pub fn drop_items(
        &self,
        sources: &[TreePath],
        destination: &[usize],
        is_move: bool,
    ) -> Result<bool, TagTreeError> {
        enum Action {
            Rename(TreePath, String),
            File(String, Vec<NodeId>),
            Nothing,
        }

        let action = {
            let state = self.state.read();
            let tree = &state.tree;
            let dest = resolve(tree, destination)
                .ok_or_else(|| TagTreeError::NotFound(format!("node at {destination:?}")))?;
            let items = sources
                .iter()
                .filter_map(|p| resolve(tree, p))
                .filter(|id| tree.node(*id).is_value())
                .collect::<Vec<_>>();
            let hierarchical_rename = match items.as_slice() {
                [single] if *single != dest => {
                    let src = tree.node(*single).value();
                    let dest_node = tree.node(dest);
                    let dest_category = dest_node
                        .value()
                        .map(|r| r.category.as_str())
                        .or_else(|| dest_node.category().map(|c| c.key.as_str()));
                    match (src, dest_category) {
                        (Some(src), Some(dest_category))
                            if src.category == dest_category
                                && self
                                    .cache
                                    .lock()
                                    .is_hierarchical_category(&src.category, &state.config) =>
                        {
                            let leaf = src
                                .original_name
                                .rsplit_once(SEGMENT_SEPARATOR)
                                .map(|(_, leaf)| leaf)
                                .unwrap_or(&src.original_name);
                            let new_name = match dest_node.value() {
                                Some(parent) => {
                                    format!("{}{SEGMENT_SEPARATOR}{leaf}", parent.original_name)
                                }
                                None => leaf.to_string(),
                            };
                            Some(Action::Rename(path_for(tree, *single), new_name))
                        }
                        _ => None,
                    }
                }
                _ => None,
            };
            match hierarchical_rename {
                Some(action) => action,
                None => {
                    let dest_node = tree.node(dest);
                    match dest_node.category() {
                        Some(item)
                            if item.key.starts_with(USER_CATEGORY_PREFIX)
                                && !dest_node.is_gst()
                                && !dest_node.is_temporary()
                                && !items.is_empty() =>
                        {
                            Action::File(item.key[1..].to_string(), items)
                        }
                        _ => Action::Nothing,
                    }
                }
            }
        };

        match action {
            Action::Rename(path, new_name) => {
                self.rename_item(&path, &new_name, false)?;
                Ok(true)
            }
            Action::File(user_category, items) => {
                let mut ucs = UserCategories::load(self.prefs.as_ref())?;
                if !ucs.contains_key(&user_category) {
                    return Ok(false);
                }
                let changed = {
                    let state = self.state.read();
                    ucs.move_or_copy(&state.tree, &items, &user_category, is_move)
                };
                if changed {
                    self.commit_user_categories(&ucs)?;
                }
                Ok(changed)
            }
            Action::Nothing => Ok(false),
        }
    }
}
