//! Error types for property and schema operations.

use thiserror::Error;

use crate::value::ValueType;

/// Errors raised by the property store and the schema validator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// No property with the given name exists.
    #[error("property not found: {name}")]
    NotFound { name: String },

    /// The stored discriminant differs from the requested one.
    #[error("type mismatch for '{name}': expected {expected}, found {found}")]
    TypeMismatch {
        name: String,
        expected: ValueType,
        found: ValueType,
    },

    /// A value or payload conflicts with the compiled schema.
    #[error("schema violation at '{path}': {message}")]
    SchemaViolation { path: String, message: String },

    /// The raw schema document could not be compiled.
    #[error("invalid schema: {message}")]
    InvalidSchema { message: String },

    /// A document had the wrong overall shape (e.g. not an object).
    #[error("invalid document: {message}")]
    InvalidDocument { message: String },
}

impl Error {
    pub(crate) fn violation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::SchemaViolation {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_schema(message: impl Into<String>) -> Self {
        Error::InvalidSchema {
            message: message.into(),
        }
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
