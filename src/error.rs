use std::io;

use minijinja::Error as TemplateError;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum TagTreeError {
    #[error("Category source error: {0}")]
    Source(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    /// A user-visible edit was refused. The message is meant to be shown as-is.
    #[error("{0}")]
    Rejected(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("Template error: {0}")]
    Template(String),
    /// An aggregate was read before the tree builder computed it.
    #[error("Aggregate not computed for '{0}'")]
    Uncomputed(String),
}

impl TagTreeError {
    /// Shorthand for a rejected user edit.
    pub fn rejected(msg: impl Into<String>) -> Self {
        TagTreeError::Rejected(msg.into())
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, TagTreeError::Rejected(_))
    }
}

impl From<toml::de::Error> for TagTreeError {
    fn from(src: toml::de::Error) -> TagTreeError {
        TagTreeError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for TagTreeError {
    fn from(src: toml::ser::Error) -> TagTreeError {
        TagTreeError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for TagTreeError {
    fn from(src: JsonError) -> TagTreeError {
        TagTreeError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for TagTreeError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => TagTreeError::NotFound(format!("{x}")),
            _ => TagTreeError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<TemplateError> for TagTreeError {
    fn from(x: TemplateError) -> Self {
        TagTreeError::Template(format!("{x}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_map_by_kind() {
        let err: TagTreeError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, TagTreeError::NotFound(_)));
        let err: TagTreeError = io::Error::new(io::ErrorKind::PermissionDenied, "locked").into();
        assert_eq!(err, TagTreeError::Io("IOError: permission denied".to_string()));
    }

    #[test]
    fn test_rejection_displays_bare_message() {
        let err = TagTreeError::rejected("Author names cannot contain & characters.");
        assert!(err.is_rejection());
        assert_eq!(err.to_string(), "Author names cannot contain & characters.");
    }
}
