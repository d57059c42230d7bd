//! Diagnostic types for tree builds.
//!
//! A build never fails because of bad preferences, broken collapse templates or stale category
//! references. Those problems are recovered locally and reported back as [BuildDiagnostic]s so the
//! caller can surface them without losing the tree.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BuildDiagnostic {
    /// A preference or tweak value was malformed; the documented default was used instead.
    Configuration {
        /// Preference key
        key: String,
        message: String,
    },

    /// A collapse label template failed to render. The affected run was attached directly to its
    /// category.
    Template {
        category: String,
        message: String,
    },

    /// Configuration referenced data the source doesn't have (skipped).
    DataConsistency(String),

    /// A rebuild was requested while another one was running. The request was dropped.
    Reentrancy,

    /// The restricted (virtual library) category query failed and the build fell back to the
    /// unrestricted data.
    Restriction(String),
}

impl BuildDiagnostic {
    pub fn configuration(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn template(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Template {
            category: category.into(),
            message: message.into(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    pub fn is_template(&self) -> bool {
        matches!(self, Self::Template { .. })
    }

    /// Log the diagnostic at warning level and return it, for use in `diagnostics.push(..)`.
    pub(crate) fn logged(self) -> Self {
        tracing::warn!("{}", self);
        self
    }
}

impl std::fmt::Display for BuildDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration { key, message } => {
                write!(f, "Preference '{key}' is not valid, ignored: {message}")
            }
            Self::Template { category, message } => {
                write!(f, "Collapse template failed for category '{category}': {message}")
            }
            Self::DataConsistency(msg) => write!(f, "Data consistency: {msg}"),
            Self::Reentrancy => write!(f, "Tag browser build already in progress"),
            Self::Restriction(msg) => write!(f, "Restricted category query failed: {msg}"),
        }
    }
}
