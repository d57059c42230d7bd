//! # tagtree
//!
//! A hierarchical, filterable navigation tree over the categorical metadata of a collection (tags,
//! authors, series, user-defined categories, ...), built for interactive browsing and for turning
//! clicks into search expressions.
//!
//! ## Overview
//!
//! A [`source::CategorySource`] hands over per-category value lists with counts, ratings and the
//! ids of the records that carry each value. tagtree turns those lists into a tree that:
//!
//! - **Decomposes dotted names**: `Fiction.SF.Hard` becomes three nested value nodes in
//!   categories the user marked as hierarchical
//! - **Collapses large categories**: into first-letter buckets (`A`, `B - D`, ...) or into fixed
//!   size partitions labelled by a template
//! - **Marks nodes for searching**: every node cycles through five toggle states that compose into
//!   search clauses
//! - **Survives edits**: renames, user-category moves and drag-and-drop rebuild the tree while
//!   views keep addressing nodes by path
//!
//! ## Architecture
//!
//! - **[`tree`]**: the node arena ([`tree::TagTree`]), the builder, first-letter interval merging
//!   and path addressing
//! - **[`query`]**: search clause composition from marked nodes
//! - **[`user_categories`]**: edits of the persisted user-category mapping
//! - **[`model`]**: [`model::TagsModel`], the owner of the current tree
//! - **[`config`]**: preference stores and the typed [`config::TreeConfig`]
//! - **[`source`]**: the metadata boundary and an in-memory implementation
//! - **[`event`]**: notifications for the view layer
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use tagtree::{
//!     config::MemoryPrefStore,
//!     event::EventSink,
//!     model::TagsModel,
//!     properties::{FieldKind, FieldMeta},
//!     source::MemorySource,
//! };
//!
//! # fn main() -> Result<(), tagtree::TagTreeError> {
//! let prefs = Arc::new(MemoryPrefStore::new());
//! let source = MemorySource::new(prefs.clone())
//!     .with_field(FieldMeta::new("authors", "Authors", FieldKind::Text).names());
//! source.add_book(1, &[("authors", &["Tolkien"])], Some(10));
//!
//! let model = TagsModel::new(Arc::new(source), prefs, EventSink::default());
//! model.rebuild()?;
//!
//! // Toggle the first author and read the resulting search clause
//! model.toggle(&[0, 0], false, None);
//! assert_eq!(model.tokens(), vec![r#"authors:"=Tolkien""#]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Diagnostics
//!
//! A build never fails because of malformed preferences or a broken collapse template. Such
//! problems are recovered and returned as [`diagnostic::BuildDiagnostic`]s from
//! [`model::TagsModel::rebuild`]. User edits that cannot be applied return
//! [`TagTreeError::Rejected`] with a message meant for display.

pub mod config;
pub mod diagnostic;
pub mod error;
pub mod event;
pub mod icons;
pub mod model;
pub mod properties;
pub mod query;
pub mod source;
#[cfg(test)]
mod tests;
pub mod tree;
pub mod user_categories;

pub use error::*;
