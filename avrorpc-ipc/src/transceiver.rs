//! Transport abstraction used by requesters.

use crate::error::IpcError;
use crate::responder::{ConnectionState, Responder};
use avrorpc_protocol::Protocol;
use std::future::Future;
use std::sync::Arc;
use tracing::trace;

/// A message-oriented transport carrying one logical connection.
///
/// A transceiver also holds that connection's handshake state: once the
/// remote protocol is set the connection counts as established and later
/// calls skip the handshake.
pub trait Transceiver: Send {
    /// Name of the peer, used to key cached server hashes.
    fn remote_name(&self) -> &str;

    /// Writes one message.
    fn write_message(&mut self, message: Vec<u8>) -> impl Future<Output = Result<(), IpcError>> + Send;

    /// Reads one message; `None` means the peer disconnected.
    fn read_message(&mut self) -> impl Future<Output = Result<Option<Vec<u8>>, IpcError>> + Send;

    /// Writes a request and reads its response.
    fn transceive(&mut self, request: Vec<u8>) -> impl Future<Output = Result<Vec<u8>, IpcError>> + Send {
        async move {
            self.write_message(request).await?;
            self.read_message().await?.ok_or(IpcError::ConnectionClosed)
        }
    }

    /// Returns whether a handshake has completed on this transport.
    fn is_connected(&self) -> bool {
        self.remote().is_some()
    }

    fn set_remote(&mut self, remote: Arc<Protocol>);

    fn remote(&self) -> Option<&Arc<Protocol>>;

    fn close(&mut self) -> impl Future<Output = Result<(), IpcError>> + Send;
}

/// In-process transceiver delivering messages straight to a responder.
pub struct LocalTransceiver {
    responder: Arc<Responder>,
    state: ConnectionState,
    remote: Option<Arc<Protocol>>,
    pending: Option<Vec<u8>>,
    closed: bool,
}

impl LocalTransceiver {
    pub fn new(responder: Arc<Responder>) -> Self {
        Self {
            responder,
            state: ConnectionState::new(),
            remote: None,
            pending: None,
            closed: false,
        }
    }

    /// Handshake state held on the responder side of this connection.
    pub fn responder_state(&self) -> &ConnectionState {
        &self.state
    }

    fn check_open(&self) -> Result<(), IpcError> {
        if self.closed {
            Err(IpcError::ConnectionClosed)
        } else {
            Ok(())
        }
    }
}

impl Transceiver for LocalTransceiver {
    fn remote_name(&self) -> &str {
        "local"
    }

    async fn write_message(&mut self, message: Vec<u8>) -> Result<(), IpcError> {
        self.check_open()?;
        trace!(len = message.len(), "local write");
        self.pending = self.responder.respond(&message, &mut self.state)?;
        Ok(())
    }

    async fn read_message(&mut self) -> Result<Option<Vec<u8>>, IpcError> {
        self.check_open()?;
        Ok(self.pending.take())
    }

    fn set_remote(&mut self, remote: Arc<Protocol>) {
        self.remote = Some(remote);
    }

    fn remote(&self) -> Option<&Arc<Protocol>> {
        self.remote.as_ref()
    }

    async fn close(&mut self) -> Result<(), IpcError> {
        self.closed = true;
        self.pending = None;
        Ok(())
    }
}
