pub use enumset::EnumSet;

use enumset::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
};

/// Identifier of one record (book) in the backing collection.
pub type BookId = u64;

/// Prefix marking user-defined category keys (`@Reading.Queue`).
pub const USER_CATEGORY_PREFIX: char = '@';

/// Separator between the segments of hierarchical names and nested user category keys.
pub const SEGMENT_SEPARATOR: char = '.';

/// Saved-search category key. Its values carry a search expression instead of an id-set.
pub const SEARCH_CATEGORY: &str = "search";

/// The news category; toggling it searches the `News` tag instead.
pub const NEWS_CATEGORY: &str = "news";

/// Standard categories whose values keep an average rating.
pub const RATED_CATEGORIES: &[&str] = &["authors", "series", "publisher", "tags"];

/// Standard categories that are never decomposed into hierarchies.
pub const FLAT_CATEGORIES: &[&str] = &["authors", "publisher", "news", "formats", "rating"];

/// Category nodes for these keys cannot be edited.
pub const READ_ONLY_CATEGORIES: &[&str] = &["news", "search", "identifiers", "languages"];

/// Full star glyph used by rating values.
pub const STAR: char = '\u{2605}';

/// Half star glyph used by rating values.
pub const HALF_STAR: char = '\u{2bea}';

/// The five search-marking states a node can be in. The integer values are the persisted
/// representation (see [crate::config::SearchOrderGraph]).
#[derive(
    Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum TagState {
    #[default]
    Clear,
    /// Include records that match this node
    MarkPlus,
    /// Include records that match this node or any of its hierarchical descendants
    MarkPlusPlus,
    /// Exclude records that match this node
    MarkMinus,
    /// Exclude records that match this node or any of its hierarchical descendants
    MarkMinusMinus,
}

impl TagState {
    pub fn all() -> &'static [TagState] {
        &[
            TagState::Clear,
            TagState::MarkPlus,
            TagState::MarkPlusPlus,
            TagState::MarkMinus,
            TagState::MarkMinusMinus,
        ]
    }

    pub fn as_index(&self) -> u8 {
        match self {
            TagState::Clear => 0,
            TagState::MarkPlus => 1,
            TagState::MarkPlusPlus => 2,
            TagState::MarkMinus => 3,
            TagState::MarkMinusMinus => 4,
        }
    }

    pub fn from_index(idx: u8) -> Option<TagState> {
        TagState::all().get(idx as usize).copied()
    }

    pub fn is_clear(&self) -> bool {
        *self == TagState::Clear
    }

    /// Minus states negate the generated search clause.
    pub fn is_negated(&self) -> bool {
        matches!(self, TagState::MarkMinus | TagState::MarkMinusMinus)
    }

    /// Strict states also match hierarchical descendants.
    pub fn is_strict(&self) -> bool {
        matches!(self, TagState::MarkPlusPlus | TagState::MarkMinusMinus)
    }
}

impl Display for TagState {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// How a value (or user category) participates in a hierarchy.
#[derive(
    Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum HierarchyMarker {
    #[default]
    None,
    /// Hierarchical, but only plus/minus marks apply (saved searches)
    ThreeState,
    /// Hierarchical with the strict plusplus/minusminus marks
    FiveState,
}

impl HierarchyMarker {
    pub fn is_hierarchical(&self) -> bool {
        *self != HierarchyMarker::None
    }

    /// Monotonic upgrade: a five-state marker never drops back.
    pub fn upgrade(&mut self, to: HierarchyMarker) {
        if to > *self {
            *self = to;
        }
    }
}

/// Closed set of field datatypes. Datatype specific behaviour hangs off this enum instead of
/// string comparisons at every call site.
#[derive(
    Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum FieldKind {
    #[default]
    Text,
    Rating,
    Series,
    /// Template-derived values. They have no item ids, so they cannot be resolved after the fact.
    Composite,
    Enumeration,
    /// A user-defined category or grouped search term (`@key`)
    User,
}

impl FieldKind {
    pub fn is_user(&self) -> bool {
        *self == FieldKind::User
    }

    pub fn is_rating(&self) -> bool {
        *self == FieldKind::Rating
    }

    /// Whether values of this kind can be looked up by name to find owning records.
    pub fn is_resolvable(&self) -> bool {
        !matches!(self, FieldKind::Composite | FieldKind::User)
    }

    /// Whether records dragged onto a value of a custom field of this kind may be assigned to it.
    pub fn accepts_record_drop(&self) -> bool {
        matches!(
            self,
            FieldKind::Text | FieldKind::Rating | FieldKind::Series | FieldKind::Enumeration
        )
    }
}

impl Display for FieldKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Metadata describing one category field, in the order the source declares them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMeta {
    /// Lookup key (`tags`, `#genre`, `@Reading.Queue`)
    pub key: String,
    /// Display name
    pub name: String,
    pub kind: FieldKind,
    pub is_custom: bool,
    /// Person-name fields (`Last, First`) never decompose on dots
    pub is_names: bool,
    /// Comma-separated-pair fields (identifiers) get a trailing `:` in searches
    pub is_csp: bool,
    pub description: Option<String>,
}

impl FieldMeta {
    pub fn new(key: &str, name: &str, kind: FieldKind) -> FieldMeta {
        FieldMeta {
            key: key.to_string(),
            name: name.to_string(),
            kind,
            ..Default::default()
        }
    }

    pub fn custom(mut self) -> FieldMeta {
        self.is_custom = true;
        self
    }

    pub fn names(mut self) -> FieldMeta {
        self.is_names = true;
        self
    }

    pub fn csp(mut self) -> FieldMeta {
        self.is_csp = true;
        self
    }

    pub fn is_user_category(&self) -> bool {
        self.key.starts_with(USER_CATEGORY_PREFIX)
    }
}

/// One value of a category as delivered by a [crate::source::CategorySource].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRecord {
    /// Item id within its field, when the source has one
    pub id: Option<u64>,
    /// Display name. Replaced by the leaf segment when the value is decomposed.
    pub name: String,
    /// Canonical full name, the target of renames and searches
    pub original_name: String,
    /// Field key the value belongs to. Inside user categories this stays the source field.
    pub category: String,
    pub count: usize,
    pub avg_rating: Option<f64>,
    pub id_set: BTreeSet<BookId>,
    pub is_hierarchical: HierarchyMarker,
    pub sort: Option<String>,
    pub use_sort_as_name: bool,
    pub is_editable: bool,
    pub is_searchable: bool,
    pub search_expression: Option<String>,
}

impl ValueRecord {
    pub fn new(name: &str, category: &str) -> ValueRecord {
        ValueRecord {
            id: None,
            name: name.to_string(),
            original_name: name.to_string(),
            category: category.to_string(),
            count: 0,
            avg_rating: None,
            id_set: BTreeSet::new(),
            is_hierarchical: HierarchyMarker::None,
            sort: None,
            use_sort_as_name: false,
            is_editable: true,
            is_searchable: true,
            search_expression: None,
        }
    }

    pub fn with_ids<I: IntoIterator<Item = BookId>>(mut self, ids: I) -> ValueRecord {
        self.id_set = ids.into_iter().collect();
        self.count = self.id_set.len();
        self
    }

    pub fn with_rating(mut self, rating: f64) -> ValueRecord {
        self.avg_rating = Some(rating);
        self
    }

    pub fn with_sort(mut self, sort: &str) -> ValueRecord {
        self.sort = Some(sort.to_string());
        self
    }

    /// The text the value is sorted and bucketed by.
    pub fn sort_text(&self) -> &str {
        match &self.sort {
            Some(sort) if !sort.is_empty() => sort,
            _ => &self.name,
        }
    }

    /// Name shown for the value.
    pub fn display_name(&self) -> &str {
        if self.use_sort_as_name {
            self.sort_text()
        } else if !self.is_hierarchical.is_hierarchical() {
            &self.original_name
        } else {
            &self.name
        }
    }
}

/// Boolean node properties.
#[derive(EnumSetType, Debug, Serialize, Deserialize)]
#[enumset(serialize_repr = "list")]
pub enum NodeFlag {
    Editable,
    Searchable,
    /// Synthesized collapse bucket
    Temporary,
    /// Category is a grouped search term
    GroupedSearchTerm,
    /// Highlighted by a find operation
    Boxed,
}

/// Order in which the source sorts each category's values.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Name,
    Popularity,
    Rating,
}

impl Display for SortOrder {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            SortOrder::Name => write!(f, "name"),
            SortOrder::Popularity => write!(f, "popularity"),
            SortOrder::Rating => write!(f, "rating"),
        }
    }
}

/// Split a dotted name into trimmed, non-empty segments. Names that don't survive the round
/// trip (leading/trailing dots, empty or padded segments) are kept whole.
pub fn name_components(name: &str) -> Vec<String> {
    let components = name
        .split(SEGMENT_SEPARATOR)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect::<Vec<_>>();
    if components.is_empty() || components.join(".") != name {
        vec![name.to_string()]
    } else {
        components
    }
}

/// Numeric rating for a star-glyph value name, e.g. `★★⯪` is `2.5`.
pub fn stars_to_rating(name: &str) -> Option<String> {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == STAR || c == HALF_STAR => {}
        _ => return None,
    }
    let len = name.chars().count();
    if name.ends_with(HALF_STAR) {
        Some(format!("{}.5", len - 1))
    } else {
        Some(len.to_string())
    }
}
