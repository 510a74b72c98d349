//! Schema error types.

use thiserror::Error;

/// Errors raised while parsing or interpreting a schema definition.
///
/// A parse that fails never yields a partially built schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid schema JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("duplicate name: {0}")]
    DuplicateName(String),

    #[error("reserved type name cannot be used as a schema name: {0}")]
    ReservedName(String),

    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("invalid field name: {0:?}")]
    InvalidFieldName(String),

    #[error("duplicate field '{field}' in record {record}")]
    DuplicateField { record: String, field: String },

    #[error("invalid size for fixed {name}: {value}")]
    InvalidSize { name: String, value: String },

    #[error("invalid symbols for enum {name}: {reason}")]
    InvalidSymbols { name: String, reason: String },

    #[error("invalid sort order: {0}")]
    InvalidOrder(String),

    #[error("invalid union: {0}")]
    InvalidUnion(String),

    #[error("missing required attribute '{attr}' in {context}")]
    MissingAttribute { attr: &'static str, context: String },

    #[error("invalid attribute '{attr}': {reason}")]
    InvalidAttribute { attr: &'static str, reason: String },

    #[error("invalid default value for {schema}: {value}")]
    InvalidDefault { schema: String, value: String },
}

impl SchemaError {
    /// Returns whether this error comes from a name conflict within one registry.
    pub fn is_name_conflict(&self) -> bool {
        matches!(
            self,
            SchemaError::DuplicateName(_) | SchemaError::ReservedName(_)
        )
    }
}
