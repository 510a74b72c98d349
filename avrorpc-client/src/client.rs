//! High-level client API.

use crate::connection::{ConnectionConfig, SocketTransceiver};
use crate::error::ClientError;
use avrorpc_ipc::{Requester, Transceiver};
use avrorpc_protocol::Protocol;
use avrorpc_schema::Value;
use std::sync::Arc;

/// Client calling the messages of one protocol on an avrorpc server.
pub struct Client {
    requester: Requester<SocketTransceiver>,
}

impl Client {
    /// Connects to the server. The handshake runs on the first call.
    pub async fn connect(
        protocol: impl Into<Arc<Protocol>>,
        config: ConnectionConfig,
    ) -> Result<Self, ClientError> {
        let transceiver = SocketTransceiver::connect(config).await?;
        Ok(Self {
            requester: Requester::new(protocol, transceiver),
        })
    }

    /// Calls `message` with its request parameters.
    pub async fn call(&mut self, message: &str, request: &Value) -> Result<Value, ClientError> {
        Ok(self.requester.request(message, request).await?)
    }

    /// Returns whether the handshake has completed.
    pub fn is_connected(&self) -> bool {
        self.requester.transceiver().is_connected()
    }

    /// Protocol declared by the server, once known.
    pub fn server_protocol(&self) -> Option<&Arc<Protocol>> {
        self.requester.remote_protocol()
    }

    pub fn local_protocol(&self) -> &Arc<Protocol> {
        self.requester.local_protocol()
    }

    /// Closes the connection.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        Ok(self.requester.close().await?)
    }
}
