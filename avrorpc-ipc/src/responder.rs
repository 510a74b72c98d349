//! Server side of a call: handshake negotiation and message dispatch.

use crate::error::{IpcError, RemoteError};
use avrorpc_io::{BinaryDecoder, BinaryEncoder, DatumReader, DatumWriter, MemoryIo, ReaderConfig};
use avrorpc_protocol::{
    read_call_meta, write_call_meta, HandshakeMatch, HandshakeRequest, HandshakeResponse, Message,
    Protocol, ProtocolHash,
};
use avrorpc_schema::Value;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Application logic invoked for each call.
pub trait MessageHandler: Send + Sync {
    /// Handles `request`, already resolved into the local request schema.
    fn invoke(&self, message: &Message, request: &Value) -> Result<Value, RemoteError>;
}

impl<F> MessageHandler for F
where
    F: Fn(&Message, &Value) -> Result<Value, RemoteError> + Send + Sync,
{
    fn invoke(&self, message: &Message, request: &Value) -> Result<Value, RemoteError> {
        self(message, request)
    }
}

/// Handshake state of one connection as seen by the responder.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    remote: Option<Arc<Protocol>>,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_established(&self) -> bool {
        self.remote.is_some()
    }

    /// Protocol agreed with the client, once established.
    pub fn remote(&self) -> Option<&Arc<Protocol>> {
        self.remote.as_ref()
    }
}

/// Answers calls against a local protocol.
///
/// One responder serves any number of connections. Client protocols learned
/// during handshakes are cached by hash for the life of the responder and
/// shared by every connection.
pub struct Responder {
    local: Arc<Protocol>,
    protocols: Arc<DashMap<ProtocolHash, Arc<Protocol>>>,
    handler: Arc<dyn MessageHandler>,
    config: ReaderConfig,
}

impl Responder {
    pub fn new(local: Protocol, handler: impl MessageHandler + 'static) -> Self {
        let local = Arc::new(local);
        let protocols = DashMap::new();
        protocols.insert(local.md5(), Arc::clone(&local));
        Self {
            local,
            protocols: Arc::new(protocols),
            handler: Arc::new(handler),
            config: ReaderConfig::new(),
        }
    }

    /// Sets how request records are materialized.
    pub fn with_config(mut self, config: ReaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn local_protocol(&self) -> &Arc<Protocol> {
        &self.local
    }

    /// Number of protocols known by hash, the local one included.
    pub fn cached_protocols(&self) -> usize {
        self.protocols.len()
    }

    /// Processes one inbound message.
    ///
    /// Returns the response bytes, or `None` when nothing is to be sent
    /// back (a one-way call on an established connection).
    pub fn respond(
        &self,
        request: &[u8],
        state: &mut ConnectionState,
    ) -> Result<Option<Vec<u8>>, IpcError> {
        let mut input = MemoryIo::from_bytes(request);
        let mut decoder = BinaryDecoder::new(&mut input);
        let mut handshake = MemoryIo::new();

        let remote = match state.remote.clone() {
            Some(remote) => remote,
            None => match self.process_handshake(&mut decoder, &mut handshake) {
                Ok(Some(remote)) => {
                    state.remote = Some(Arc::clone(&remote));
                    remote
                }
                Ok(None) => return Ok(Some(handshake.into_inner())),
                Err(e) => {
                    warn!(error = %e, "handshake failed");
                    return system_error(MemoryIo::new(), &e.to_string()).map(Some);
                }
            },
        };

        let mut body = MemoryIo::new();
        match self.process_call(&remote, &mut decoder, &mut body) {
            Ok(true) => {
                let mut out = handshake.into_inner();
                out.extend_from_slice(body.as_bytes());
                Ok(Some(out))
            }
            Ok(false) if handshake.is_empty() => Ok(None),
            Ok(false) => Ok(Some(handshake.into_inner())),
            Err(e) => {
                warn!(error = %e, "call failed");
                system_error(handshake, &e.to_string()).map(Some)
            }
        }
    }

    fn process_handshake(
        &self,
        decoder: &mut BinaryDecoder<'_>,
        out: &mut MemoryIo,
    ) -> Result<Option<Arc<Protocol>>, IpcError> {
        let request = HandshakeRequest::read(decoder)?;

        let mut remote = self
            .protocols
            .get(&request.client_hash)
            .map(|entry| Arc::clone(entry.value()));
        if remote.is_none() {
            if let Some(ref json) = request.client_protocol {
                let protocol = Arc::new(Protocol::parse(json)?);
                debug!(protocol = protocol.fullname(), "learned client protocol");
                self.protocols.insert(request.client_hash, Arc::clone(&protocol));
                remote = Some(protocol);
            }
        }

        let local_hash = self.local.md5();
        let matching = match remote {
            None => HandshakeMatch::None,
            Some(_) if request.server_hash == local_hash => HandshakeMatch::Both,
            Some(_) => HandshakeMatch::Client,
        };
        debug!(%matching, "handshake");

        let include_server = matching != HandshakeMatch::Both;
        let response = HandshakeResponse {
            matching,
            server_protocol: include_server.then(|| self.local.canonical_json().to_string()),
            server_hash: include_server.then_some(local_hash),
            meta: None,
        };
        response.write(&mut BinaryEncoder::new(out))?;
        Ok(remote)
    }

    /// Reads and answers a call. Returns whether a response body was written.
    fn process_call(
        &self,
        remote: &Protocol,
        decoder: &mut BinaryDecoder<'_>,
        out: &mut MemoryIo,
    ) -> Result<bool, IpcError> {
        read_call_meta(decoder)?;
        let name = decoder.read_string()?;
        let remote_message = remote
            .message(&name)
            .ok_or_else(|| IpcError::UnknownMessage(name.clone()))?;
        let local_message = self
            .local
            .message(&name)
            .ok_or_else(|| IpcError::UnknownMessage(name.clone()))?;

        let request = DatumReader::with_schemas(
            remote_message.request().clone(),
            local_message.request().clone(),
        )
        .with_config(self.config.clone())
        .read(decoder)?;

        let result = self.handler.invoke(local_message, &request);
        if local_message.is_one_way() {
            if let Err(e) = result {
                warn!(name = %name, error = %e, "one-way call failed");
            }
            return Ok(false);
        }

        let mut encoder = BinaryEncoder::new(out);
        write_call_meta(&mut encoder)?;
        match result {
            Ok(value) => {
                encoder.write_boolean(false)?;
                DatumWriter::new(local_message.response().clone()).write(&value, &mut encoder)?;
            }
            Err(e) => {
                debug!(name = %name, error = %e, "call returned error");
                encoder.write_boolean(true)?;
                DatumWriter::new(local_message.errors().clone()).write(&e.to_value(), &mut encoder)?;
            }
        }
        Ok(true)
    }
}

/// Appends a system error response to `out`.
fn system_error(mut out: MemoryIo, message: &str) -> Result<Vec<u8>, IpcError> {
    let mut encoder = BinaryEncoder::new(&mut out);
    write_call_meta(&mut encoder)?;
    encoder.write_boolean(true)?;
    // Branch 0 of every error union is "string".
    encoder.write_long(0)?;
    encoder.write_string(message)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{simple, simple_handler};
    use avrorpc_io::{encode_long, AvroIo};

    fn handshake_bytes(request: &HandshakeRequest) -> Vec<u8> {
        let mut io = MemoryIo::new();
        request.write(&mut BinaryEncoder::new(&mut io)).unwrap();
        io.into_inner()
    }

    fn call_bytes(protocol: &Protocol, name: &str, request: &Value) -> Vec<u8> {
        let mut io = MemoryIo::new();
        let mut encoder = BinaryEncoder::new(&mut io);
        write_call_meta(&mut encoder).unwrap();
        encoder.write_string(name).unwrap();
        DatumWriter::new(protocol.message(name).unwrap().request().clone())
            .write(request, &mut encoder)
            .unwrap();
        io.into_inner()
    }

    fn read_handshake(io: &mut MemoryIo) -> HandshakeResponse {
        HandshakeResponse::read(&mut BinaryDecoder::new(io)).unwrap()
    }

    fn add_args(a: i32, b: i32) -> Value {
        avrorpc_schema::Record::new("")
            .with("arg1", a)
            .with("arg2", b)
            .into()
    }

    #[test]
    fn test_unknown_client_gets_none() {
        let responder = Responder::new(simple(), simple_handler);
        let mut state = ConnectionState::new();
        let hash = responder.local_protocol().md5();

        let mut message = handshake_bytes(&HandshakeRequest {
            client_hash: [0xaa; 16],
            client_protocol: None,
            server_hash: hash,
            meta: None,
        });
        message.extend(call_bytes(&simple(), "add", &add_args(1, 2)));

        let reply = responder.respond(&message, &mut state).unwrap().unwrap();
        let mut io = MemoryIo::from_bytes(reply);
        let response = read_handshake(&mut io);
        assert_eq!(response.matching, HandshakeMatch::None);
        assert_eq!(response.server_hash, Some(hash));
        assert!(response.server_protocol.is_some());
        assert!(io.is_eof().unwrap());
        assert!(!state.is_established());
    }

    #[test]
    fn test_known_client_gets_both() {
        let responder = Responder::new(simple(), simple_handler);
        let mut state = ConnectionState::new();
        let hash = responder.local_protocol().md5();

        let mut message = handshake_bytes(&HandshakeRequest {
            client_hash: hash,
            client_protocol: None,
            server_hash: hash,
            meta: None,
        });
        message.extend(call_bytes(&simple(), "add", &add_args(40, 2)));

        let reply = responder.respond(&message, &mut state).unwrap().unwrap();
        let mut io = MemoryIo::from_bytes(reply);
        let response = read_handshake(&mut io);
        assert_eq!(response.matching, HandshakeMatch::Both);
        assert_eq!(response.server_protocol, None);
        assert_eq!(response.server_hash, None);

        let mut decoder = BinaryDecoder::new(&mut io);
        read_call_meta(&mut decoder).unwrap();
        assert!(!decoder.read_boolean().unwrap());
        assert_eq!(decoder.read_int().unwrap(), 42);
        assert!(state.is_established());

        // Established: no handshake on the next call.
        let message = call_bytes(&simple(), "add", &add_args(1, 1));
        let reply = responder.respond(&message, &mut state).unwrap().unwrap();
        assert_eq!(reply, vec![0x00, 0x00, 0x04]);
    }

    #[test]
    fn test_client_protocol_is_cached() {
        let responder = Responder::new(simple(), simple_handler);
        let client = crate::test_support::simple_v2();
        assert_eq!(responder.cached_protocols(), 1);

        let mut state = ConnectionState::new();
        let mut message = handshake_bytes(&HandshakeRequest {
            client_hash: client.md5(),
            client_protocol: Some(client.canonical_json().to_string()),
            server_hash: client.md5(),
            meta: None,
        });
        message.extend(call_bytes(&client, "add", &add_args(1, 2)));

        let reply = responder.respond(&message, &mut state).unwrap().unwrap();
        let mut io = MemoryIo::from_bytes(reply);
        let response = read_handshake(&mut io);
        assert_eq!(response.matching, HandshakeMatch::Client);
        assert_eq!(responder.cached_protocols(), 2);
        assert_eq!(state.remote().unwrap().md5(), client.md5());
    }

    #[test]
    fn test_one_way_returns_nothing_once_established() {
        let responder = Responder::new(simple(), simple_handler);
        let hash = responder.local_protocol().md5();
        let mut state = ConnectionState::new();

        let mut message = handshake_bytes(&HandshakeRequest {
            client_hash: hash,
            client_protocol: None,
            server_hash: hash,
            meta: None,
        });
        let ack = call_bytes(&simple(), "ack", &Value::Map(Default::default()));
        message.extend(ack.iter().copied());

        // First call carries only the handshake back.
        let reply = responder.respond(&message, &mut state).unwrap().unwrap();
        let mut io = MemoryIo::from_bytes(reply);
        assert_eq!(read_handshake(&mut io).matching, HandshakeMatch::Both);
        assert!(io.is_eof().unwrap());

        assert_eq!(responder.respond(&ack, &mut state).unwrap(), None);
    }

    #[test]
    fn test_unknown_message_is_system_error() {
        let responder = Responder::new(simple(), simple_handler);
        let mut state = ConnectionState::new();
        state.remote = Some(Arc::clone(responder.local_protocol()));

        let mut io = MemoryIo::new();
        let mut encoder = BinaryEncoder::new(&mut io);
        write_call_meta(&mut encoder).unwrap();
        encoder.write_string("missing").unwrap();

        let reply = responder.respond(&io.into_inner(), &mut state).unwrap().unwrap();
        let mut io = MemoryIo::from_bytes(reply);
        let mut decoder = BinaryDecoder::new(&mut io);
        read_call_meta(&mut decoder).unwrap();
        assert!(decoder.read_boolean().unwrap());
        assert_eq!(decoder.read_long().unwrap(), 0);
        assert_eq!(decoder.read_string().unwrap(), "unknown message: missing");
    }

    #[test]
    fn test_garbage_handshake_is_system_error() {
        let responder = Responder::new(simple(), simple_handler);
        let mut state = ConnectionState::new();

        let reply = responder.respond(&[0x01, 0x02], &mut state).unwrap().unwrap();
        let mut io = MemoryIo::from_bytes(reply);
        let mut decoder = BinaryDecoder::new(&mut io);
        read_call_meta(&mut decoder).unwrap();
        assert!(decoder.read_boolean().unwrap());
        assert!(!state.is_established());
    }

    #[test]
    fn test_oversized_handshake_string_is_system_error() {
        let responder = Responder::new(simple(), simple_handler);
        let mut state = ConnectionState::new();

        // clientHash, then clientProtocol on the string branch with a
        // length far beyond the message.
        let mut message = vec![0xaa; 16];
        message.push(0x02);
        encode_long(i64::MAX / 2, &mut message);

        let reply = responder.respond(&message, &mut state).unwrap().unwrap();
        let mut io = MemoryIo::from_bytes(reply);
        let mut decoder = BinaryDecoder::new(&mut io);
        read_call_meta(&mut decoder).unwrap();
        assert!(decoder.read_boolean().unwrap());
        assert_eq!(decoder.read_long().unwrap(), 0);
        assert!(decoder.read_string().unwrap().contains("short read"));
        assert!(!state.is_established());
        assert_eq!(responder.cached_protocols(), 1);
    }
}
