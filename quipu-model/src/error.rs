//! Errors raised while parsing model values.

use std::fmt::{self, Display};

/// Errors produced by model constructors and parsers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// An id was not a positive integer.
    InvalidId { kind: &'static str, raw: String },
    /// A value was outside an enum's vocabulary.
    UnknownVariant { kind: &'static str, raw: String },
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidId { kind, raw } => {
                write!(f, "{kind} id must be a positive integer, got {raw:?}")
            }
            ModelError::UnknownVariant { kind, raw } => {
                write!(f, "unrecognized {kind}: {raw:?}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

/// Result alias for model parsing.
pub type Result<T> = std::result::Result<T, ModelError>;
