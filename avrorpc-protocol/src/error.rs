//! Protocol error types.

use avrorpc_io::CodecError;
use avrorpc_schema::SchemaError;
use thiserror::Error;

/// Errors raised while parsing protocols or framing messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("invalid protocol: {0}")]
    InvalidProtocol(String),

    #[error("invalid message '{message}': {reason}")]
    InvalidMessage { message: String, reason: String },

    #[error("message '{message}' declares unknown error type '{error_type}'")]
    UnknownErrorType { message: String, error_type: String },

    #[error("invalid handshake record: {0}")]
    InvalidHandshake(String),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("too many frames in one message: {0}")]
    TooManyFrames(u32),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl ProtocolError {
    pub(crate) fn invalid_message(message: &str, reason: impl Into<String>) -> Self {
        ProtocolError::InvalidMessage {
            message: message.to_string(),
            reason: reason.into(),
        }
    }
}
