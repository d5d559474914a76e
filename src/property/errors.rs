//! # Property Errors
//!
//! Failures raised while binding or serializing properties.

use thiserror::Error;

/// Result type for property operations
pub type PropertyResult<T> = Result<T, PropertyError>;

/// Property engine errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PropertyError {
    // ==================
    // Binding Errors
    // ==================
    /// No implementation registered for a property type
    #[error("No implementation registered for property type '{0}'")]
    UnknownType(String),

    /// Array property declared without `items`
    #[error("Array property '{0}' must declare items")]
    MissingItems(String),

    /// Relation property declared without `ref`
    #[error("Relation property '{0}' must declare ref")]
    MissingRef(String),

    // ==================
    // Serialization Errors
    // ==================
    /// Input cannot be parsed as a date
    #[error("Property '{path}': cannot parse {value} as a date")]
    InvalidDate { path: String, value: String },

    /// Input cannot be coerced to a number
    #[error("Property '{path}': cannot coerce {value} to a number")]
    InvalidNumber { path: String, value: String },

    /// Input cannot be read as a relation reference
    #[error("Property '{path}': invalid relation value: {reason}")]
    InvalidRelation { path: String, reason: String },

    /// Relation handle has no resolver attached
    #[error("Relation to '{0}' cannot be resolved without a resolver")]
    Unresolvable(String),
}
