//! Typed error categories for the engine.
//!
//! Every fallible operation in this crate returns `Result<_, CoreError>`
//! rather than an opaque error type, so callers can match on the failure
//! kind.

use crate::path::Path;

/// The categories a caller can match on. `Display` messages always name
/// the offending path and are safe to surface to an end user; internal
/// detail (spans, raw parser state) is logged via `log::debug!` instead
/// of embedded in the message.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("failed to parse YAML: {0}")]
    Parse(String),

    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("type mismatch at {path}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: String,
    },

    #[error("invalid path expression {path:?}: {reason}")]
    PathInvalid { path: String, reason: String },

    #[error("index out of bounds at {path}: {index} (len {len})")]
    BoundsOrIndex {
        path: String,
        index: i64,
        len: usize,
    },

    #[error("cannot traverse through non-container node at {path}")]
    Collision { path: String },

    #[error("could not classify resource: {reason}")]
    Classification { reason: String },

    #[error("{} error(s) occurred: {}", .0.len(), join_many(.0))]
    Many(Vec<CoreError>),
}

fn join_many(errors: &[CoreError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl CoreError {
    pub fn not_found(path: &Path) -> Self {
        CoreError::NotFound {
            path: path.to_wire(),
        }
    }

    pub fn path_invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::PathInvalid {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn collision(path: &Path) -> Self {
        CoreError::Collision {
            path: path.to_wire(),
        }
    }

    /// Aggregate errors accumulated from a multi-document or
    /// multi-resource operation into a single joined error. Returns
    /// `None` when the input is empty.
    pub fn many(errors: Vec<CoreError>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else if errors.len() == 1 {
            errors.into_iter().next()
        } else {
            Some(CoreError::Many(errors))
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
