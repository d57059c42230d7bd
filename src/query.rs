use std::collections::BTreeSet;

use regex::escape as re_escape;

use crate::{
    properties::{stars_to_rating, FieldMeta, TagState, NEWS_CATEGORY, USER_CATEGORY_PREFIX},
    tree::{NodeId, TagTree},
};

/// The search word a category-level mark turns into.
fn category_search(state: TagState) -> &'static str {
    match state {
        TagState::MarkPlus => "true",
        TagState::MarkPlusPlus => ".true",
        TagState::MarkMinus => "false",
        TagState::MarkMinusMinus => ".false",
        TagState::Clear => "",
    }
}

/// Search-language field the first-letter clause of a category matches against.
fn sort_field(key: &str) -> &str {
    match key {
        "authors" => "author_sort",
        "series" => "series_sort",
        other => other,
    }
}

/// Escape a value for use inside a `"..."` search term.
fn quote_value(name: &str) -> String {
    let escaped = name.replace('"', "\\\"");
    if name.starts_with('.') {
        format!(".{escaped}")
    } else {
        escaped
    }
}

/// Clause for a marked first-letter bucket: match every value whose sort text starts with one
/// of the letters seen under the bucket.
fn bucket_clause(tree: &TagTree, bucket: NodeId, key: &str) -> String {
    let mut letters: Vec<String> = Vec::new();
    for child in tree.children(bucket) {
        let first = tree
            .node(*child)
            .value()
            .and_then(|r| r.sort_text().chars().next());
        if let Some(c) = first {
            let escaped = re_escape(&c.to_string());
            if !letters.contains(&escaped) {
                letters.push(escaped);
            }
        }
    }
    let field = sort_field(key);
    if letters.is_empty() {
        return format!("{field}:false");
    }
    let class = letters.concat();
    match field {
        "author_sort" => format!(r#"{field}:"""~(^[{class}])|(&\s*[{class}])""""#),
        _ => format!(r#"{field}:"""~^[{class}]""""#),
    }
}

/// Turn the marked nodes of `tree` into search clauses, in category order.
///
/// Category marks become `key:true` style existence tests. Marked values become
/// `category:"=name"` equality tests (`not ` prefixed for minus marks, `=.` for the strict
/// marks that include hierarchical children). A value listed in several places, a user category
/// and its own category say, contributes one clause. With first-letter collapsing, a marked
/// letter bucket becomes a single regex clause over its letters. The caller decides how the
/// clauses are joined.
pub fn compose_tokens(
    tree: &TagTree,
    category_nodes: &[NodeId],
    fields: &[FieldMeta],
    first_letter_buckets: bool,
) -> Vec<String> {
    let mut tokens = Vec::new();
    // The same tag may show under both `tags` and `news`
    let mut tags_seen: BTreeSet<String> = BTreeSet::new();
    let mut values_seen: BTreeSet<(String, String)> = BTreeSet::new();
    let is_csp = |category: &str| {
        fields
            .iter()
            .find(|f| f.key == category)
            .map(|f| f.is_csp)
            .unwrap_or(false)
    };

    for category in category_nodes {
        let node = tree.node(*category);
        let key = match node.category() {
            Some(item) => item.key.as_str(),
            None => continue,
        };
        if !node.state.is_clear() {
            if key == NEWS_CATEGORY {
                if node.state == TagState::MarkPlus {
                    tokens.push(r#"tags:"=News""#.to_string());
                } else {
                    tokens.push(r#"( not tags:"=News")"#.to_string());
                }
            } else {
                tokens.push(format!("{key}:{}", category_search(node.state)));
            }
        }

        for child in tree.all_children(*category) {
            let child_node = tree.node(child);
            if child_node.is_category() {
                if first_letter_buckets
                    && child_node.is_temporary()
                    && !key.starts_with(USER_CATEGORY_PREFIX)
                    && !child_node.state.is_clear()
                {
                    let clause = bucket_clause(tree, child, key);
                    if child_node.state == TagState::MarkPlus {
                        tokens.push(clause);
                    } else {
                        tokens.push(format!("(not {clause})"));
                    }
                }
                continue;
            }
            let record = match child_node.value() {
                Some(record) if !child_node.state.is_clear() => record,
                _ => continue,
            };
            let prefix = if child_node.state.is_negated() {
                "not "
            } else {
                ""
            };
            let search_category = if node.is_gst() {
                key
            } else if key == NEWS_CATEGORY {
                "tag"
            } else {
                record.category.as_str()
            };
            if let Some(rating) = stars_to_rating(&record.name) {
                tokens.push(format!("{prefix}{search_category}:{rating}"));
                continue;
            }
            let name = &record.original_name;
            if search_category == "tags" && !tags_seen.insert(name.clone()) {
                continue;
            }
            if !values_seen.insert((name.clone(), record.category.clone())) {
                continue;
            }
            tokens.push(format!(
                r#"{prefix}{search_category}:"={}{}{}""#,
                if child_node.state.is_strict() { "." } else { "" },
                quote_value(name),
                if is_csp(&record.category) { ":" } else { "" }
            ));
        }
    }
    tracing::debug!("Composed {} search tokens", tokens.len());
    tokens
}
