//! # avrorpc-schema
//!
//! Avro schema model for avrorpc.
//!
//! This crate provides:
//! - Parsing of JSON schema definitions into a typed schema graph
//! - A named-schema registry supporting self and mutual references
//! - Canonical JSON serialization for re-parsing and hashing
//! - Datum validation and default-value interpretation

pub mod canonical;
pub mod default;
pub mod error;
pub mod name;
pub mod parse;
pub mod schema;
pub mod validate;
pub mod value;

pub use canonical::SchemaJsonWriter;
pub use default::json_to_value;
pub use error::SchemaError;
pub use name::{is_primitive_type, is_valid_identifier, Name};
pub use parse::Parser;
pub use schema::{
    AvroSchema, EnumSchema, Field, FixedSchema, NamedSchema, RecordSchema, Schema, Schemata,
    SortOrder, UnionSchema,
};
pub use validate::is_valid_datum;
pub use value::{Record, Value};
