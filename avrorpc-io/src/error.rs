//! Codec error types.

use avrorpc_schema::SchemaError;
use thiserror::Error;

/// Failures of the underlying byte channel.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("short read: wanted {wanted} bytes, got {got}")]
    ShortRead { wanted: usize, got: usize },

    #[error("channel is closed")]
    Closed,

    #[error("invalid seek to offset {0}")]
    InvalidSeek(i64),

    #[error("I/O error: {0}")]
    Os(#[from] std::io::Error),
}

/// Errors raised while encoding or decoding datums.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("datum {value} is not an example of schema {schema}")]
    Type { schema: String, value: String },

    #[error("writer schema {writer} does not match reader schema {reader}")]
    SchemaMatch { writer: String, reader: String },

    #[error("no value and no default for reader field '{field}'")]
    MissingDefault { field: String },

    #[error("symbol '{symbol}' is not in reader enum {schema}")]
    UnknownSymbol { symbol: String, schema: String },

    #[error("invalid encoded data: {0}")]
    InvalidData(String),

    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
}

impl CodecError {
    pub(crate) fn type_error(schema: &avrorpc_schema::Schema, value: &avrorpc_schema::Value) -> Self {
        CodecError::Type {
            schema: schema.to_string(),
            value: format!("{:?}", value),
        }
    }

    pub(crate) fn schema_match(
        writer: &avrorpc_schema::Schema,
        reader: &avrorpc_schema::Schema,
    ) -> Self {
        CodecError::SchemaMatch {
            writer: writer.to_string(),
            reader: reader.to_string(),
        }
    }

    /// Returns whether the error was caused by truncated or closed input.
    pub fn is_io(&self) -> bool {
        matches!(self, CodecError::Io(_))
    }
}
