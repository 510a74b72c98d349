//! Client error types.

use avrorpc_ipc::IpcError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] avrorpc_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error(transparent)]
    Ipc(IpcError),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) | ClientError::Timeout | ClientError::ConnectionClosed => true,
            ClientError::Ipc(e) => e.is_connection_error(),
            _ => false,
        }
    }
}

impl From<IpcError> for ClientError {
    fn from(err: IpcError) -> Self {
        match err {
            IpcError::Timeout => ClientError::Timeout,
            IpcError::ConnectionClosed => ClientError::ConnectionClosed,
            IpcError::Io(e) => ClientError::Io(e),
            other => ClientError::Ipc(other),
        }
    }
}

impl From<ClientError> for IpcError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Io(e) => IpcError::Io(e),
            ClientError::Protocol(e) => IpcError::Protocol(e),
            ClientError::NotConnected | ClientError::ConnectionClosed => IpcError::ConnectionClosed,
            ClientError::Timeout => IpcError::Timeout,
            ClientError::Ipc(e) => e,
        }
    }
}
