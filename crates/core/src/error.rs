//! Shared parse/validation errors for core types.

use thiserror::Error;

/// Result type for core-level parsing and validation.
pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An aggregate type tag was not one of the known stable tags.
    #[error("unknown aggregate type: {0}")]
    UnknownAggregateType(String),

    /// A stable tag failed to parse (ordering, phase).
    #[error("invalid tag: {0}")]
    InvalidTag(String),

    /// An identifier was empty or otherwise malformed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl CoreError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn invalid_tag(msg: impl Into<String>) -> Self {
        Self::InvalidTag(msg.into())
    }
}
