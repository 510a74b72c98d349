//! Server error types.

use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] avrorpc_protocol::ProtocolError),

    #[error("RPC error: {0}")]
    Ipc(#[from] avrorpc_ipc::IpcError),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Returns whether the error ends only the connection it occurred on.
    pub fn is_connection_error(&self) -> bool {
        !matches!(self, ServerError::Config(_))
    }
}
