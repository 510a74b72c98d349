//! Client side of a call: handshake negotiation and response decoding.

use crate::error::{IpcError, RemoteError};
use crate::transceiver::Transceiver;
use avrorpc_io::{BinaryDecoder, BinaryEncoder, DatumReader, DatumWriter, MemoryIo, ReaderConfig};
use avrorpc_protocol::{
    read_call_meta, write_call_meta, HandshakeMatch, HandshakeRequest, HandshakeResponse, Message,
    Protocol, ProtocolHash,
};
use avrorpc_schema::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Issues calls of a local protocol over a transceiver.
///
/// The handshake runs on the first call of a connection. When the server
/// does not know this client's protocol the call is resent with the
/// protocol attached, without the caller noticing.
pub struct Requester<T: Transceiver> {
    local: Arc<Protocol>,
    transceiver: T,
    remote_hashes: HashMap<String, ProtocolHash>,
    remote_protocols: HashMap<ProtocolHash, Arc<Protocol>>,
    send_protocol: bool,
    config: ReaderConfig,
}

impl<T: Transceiver> Requester<T> {
    pub fn new(local: impl Into<Arc<Protocol>>, transceiver: T) -> Self {
        Self {
            local: local.into(),
            transceiver,
            remote_hashes: HashMap::new(),
            remote_protocols: HashMap::new(),
            send_protocol: false,
            config: ReaderConfig::new(),
        }
    }

    /// Sets how response records are materialized.
    pub fn with_config(mut self, config: ReaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn local_protocol(&self) -> &Arc<Protocol> {
        &self.local
    }

    pub fn transceiver(&self) -> &T {
        &self.transceiver
    }

    pub fn transceiver_mut(&mut self) -> &mut T {
        &mut self.transceiver
    }

    pub fn into_transceiver(self) -> T {
        self.transceiver
    }

    /// Protocol the server declared, once the handshake completed.
    pub fn remote_protocol(&self) -> Option<&Arc<Protocol>> {
        self.transceiver.remote()
    }

    /// Calls `message_name` with `request` and returns the response.
    ///
    /// One-way messages return [`Value::Null`] without waiting for a call
    /// response. Errors raised by the remote handler come back as
    /// [`IpcError::Remote`].
    pub async fn request(&mut self, message_name: &str, request: &Value) -> Result<Value, IpcError> {
        let local = Arc::clone(&self.local);
        let message = local
            .message(message_name)
            .ok_or_else(|| IpcError::UnknownMessage(message_name.to_string()))?;

        loop {
            let call = self.write_call(message, request)?;

            if message.is_one_way() && self.transceiver.is_connected() {
                self.transceiver.write_message(call).await?;
                return Ok(Value::Null);
            }

            let response = self.transceiver.transceive(call).await?;
            let mut io = MemoryIo::from_bytes(response);
            let mut decoder = BinaryDecoder::new(&mut io);

            if !self.transceiver.is_connected() && !self.read_handshake_response(&mut decoder)? {
                continue;
            }

            if message.is_one_way() {
                return Ok(Value::Null);
            }
            return self.read_call_response(message, &mut decoder);
        }
    }

    /// Closes the underlying transceiver.
    pub async fn close(&mut self) -> Result<(), IpcError> {
        self.transceiver.close().await
    }

    fn write_call(&self, message: &Message, request: &Value) -> Result<Vec<u8>, IpcError> {
        let mut io = MemoryIo::new();
        let mut encoder = BinaryEncoder::new(&mut io);
        if !self.transceiver.is_connected() {
            self.handshake_request().write(&mut encoder)?;
        }
        write_call_meta(&mut encoder)?;
        encoder.write_string(message.name())?;
        DatumWriter::new(message.request().clone()).write(request, &mut encoder)?;
        Ok(io.into_inner())
    }

    fn expected_server_hash(&self) -> ProtocolHash {
        self.remote_hashes
            .get(self.transceiver.remote_name())
            .copied()
            .unwrap_or_else(|| self.local.md5())
    }

    fn handshake_request(&self) -> HandshakeRequest {
        HandshakeRequest {
            client_hash: self.local.md5(),
            client_protocol: self
                .send_protocol
                .then(|| self.local.canonical_json().to_string()),
            server_hash: self.expected_server_hash(),
            meta: None,
        }
    }

    /// Applies a handshake response. Returns whether the connection is
    /// now established.
    fn read_handshake_response(&mut self, decoder: &mut BinaryDecoder<'_>) -> Result<bool, IpcError> {
        let response = HandshakeResponse::read(decoder)?;
        debug!(matching = %response.matching, remote = self.transceiver.remote_name(), "handshake response");

        match response.matching {
            HandshakeMatch::Both => {
                let hash = self.expected_server_hash();
                let remote = self
                    .remote_protocols
                    .get(&hash)
                    .cloned()
                    .unwrap_or_else(|| Arc::clone(&self.local));
                self.send_protocol = false;
                self.transceiver.set_remote(remote);
                Ok(true)
            }
            HandshakeMatch::Client => {
                let remote = self.learn_server_protocol(&response)?;
                self.send_protocol = false;
                self.transceiver.set_remote(remote);
                Ok(true)
            }
            HandshakeMatch::None => {
                if self.send_protocol {
                    return Err(IpcError::Handshake(
                        "server rejected the client protocol".into(),
                    ));
                }
                self.learn_server_protocol(&response)?;
                self.send_protocol = true;
                Ok(false)
            }
        }
    }

    fn learn_server_protocol(&mut self, response: &HandshakeResponse) -> Result<Arc<Protocol>, IpcError> {
        let hash = response
            .server_hash
            .ok_or_else(|| IpcError::Handshake(format!("{} response without serverHash", response.matching)))?;
        self.remote_hashes
            .insert(self.transceiver.remote_name().to_string(), hash);

        if let Some(protocol) = self.remote_protocols.get(&hash) {
            return Ok(Arc::clone(protocol));
        }
        let json = response.server_protocol.as_deref().ok_or_else(|| {
            IpcError::Handshake(format!("{} response without serverProtocol", response.matching))
        })?;
        let protocol = Arc::new(Protocol::parse(json)?);
        debug!(protocol = protocol.fullname(), "learned server protocol");
        self.remote_protocols.insert(hash, Arc::clone(&protocol));
        Ok(protocol)
    }

    fn read_call_response(&self, message: &Message, decoder: &mut BinaryDecoder<'_>) -> Result<Value, IpcError> {
        read_call_meta(decoder)?;
        let is_error = decoder.read_boolean()?;
        let remote_message = self
            .transceiver
            .remote()
            .and_then(|remote| remote.message(message.name()));

        if !is_error {
            let writer = remote_message
                .ok_or_else(|| IpcError::UnknownMessage(message.name().to_string()))?;
            let value = DatumReader::with_schemas(writer.response().clone(), message.response().clone())
                .with_config(self.config.clone())
                .read(decoder)?;
            return Ok(value);
        }

        // System errors are always branch 0, so the local union can read
        // them when the server lacks the message.
        let writer = remote_message.unwrap_or(message);
        let value = DatumReader::with_schemas(writer.errors().clone(), message.errors().clone())
            .with_config(self.config.clone().typed_records(true))
            .read(decoder)?;
        Err(RemoteError::from_value(value).into())
    }
}
