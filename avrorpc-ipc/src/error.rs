//! RPC error types.

use avrorpc_io::CodecError;
use avrorpc_protocol::ProtocolError;
use avrorpc_schema::{Record, Value};
use thiserror::Error;

/// An error raised by a responder's handler and carried back as data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    /// One of the message's declared error types.
    #[error("remote error {name}: {value:?}")]
    Declared { name: String, value: Value },

    /// Anything else, sent as the implicit string branch.
    #[error("remote system error: {0}")]
    System(String),
}

impl RemoteError {
    /// Builds a declared error from its type fullname and field values.
    pub fn declared(name: impl Into<String>, value: Value) -> Self {
        RemoteError::Declared {
            name: name.into(),
            value,
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        RemoteError::System(message.into())
    }

    /// Value written into a message's error union.
    pub fn to_value(&self) -> Value {
        match self {
            RemoteError::System(message) => Value::String(message.clone()),
            RemoteError::Declared { name, value } => match value {
                Value::Map(fields) => Value::Record(Record::from_fields(name.clone(), fields.clone())),
                other => other.clone(),
            },
        }
    }

    /// Interprets a value read from an error union.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(message) => RemoteError::System(message),
            Value::Record(record) => RemoteError::Declared {
                name: record.name().to_string(),
                value: Value::Record(record),
            },
            other => RemoteError::System(format!("unrecognized error value {:?}", other)),
        }
    }

    pub fn is_declared(&self) -> bool {
        matches!(self, RemoteError::Declared { .. })
    }
}

/// Errors raised by requesters, responders and transceivers.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("unknown message: {0}")]
    UnknownMessage(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IpcError {
    /// Returns the remote error if the call failed on the responder.
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            IpcError::Remote(e) => Some(e),
            _ => None,
        }
    }

    /// Returns whether the transport is unusable after this error.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            IpcError::ConnectionClosed | IpcError::Timeout | IpcError::Io(_)
        )
    }
}
