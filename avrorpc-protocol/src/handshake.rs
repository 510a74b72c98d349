//! Handshake records exchanged before the first call on a connection.

use crate::error::ProtocolError;
use crate::protocol::ProtocolHash;
use avrorpc_io::{BinaryDecoder, BinaryEncoder, DatumReader, DatumWriter};
use avrorpc_schema::{AvroSchema, Record, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

pub const HANDSHAKE_REQUEST_SCHEMA: &str = r#"{
    "type": "record",
    "name": "HandshakeRequest",
    "namespace": "org.apache.avro.ipc",
    "fields": [
        {"name": "clientHash", "type": {"type": "fixed", "name": "MD5", "size": 16}},
        {"name": "clientProtocol", "type": ["null", "string"]},
        {"name": "serverHash", "type": "MD5"},
        {"name": "meta", "type": ["null", {"type": "map", "values": "bytes"}]}
    ]
}"#;

pub const HANDSHAKE_RESPONSE_SCHEMA: &str = r#"{
    "type": "record",
    "name": "HandshakeResponse",
    "namespace": "org.apache.avro.ipc",
    "fields": [
        {"name": "match", "type": {"type": "enum", "name": "HandshakeMatch", "symbols": ["BOTH", "CLIENT", "NONE"]}},
        {"name": "serverProtocol", "type": ["null", "string"]},
        {"name": "serverHash", "type": ["null", {"type": "fixed", "name": "MD5", "size": 16}]},
        {"name": "meta", "type": ["null", {"type": "map", "values": "bytes"}]}
    ]
}"#;

/// Per-call metadata, always written empty.
pub const META_SCHEMA: &str = r#"{"type": "map", "values": "bytes"}"#;

/// Handshake metadata map.
pub type Meta = BTreeMap<String, Vec<u8>>;

fn cached(cell: &'static OnceLock<AvroSchema>, json: &str) -> &'static AvroSchema {
    cell.get_or_init(|| AvroSchema::parse(json).expect("built-in schema is valid"))
}

pub fn handshake_request_schema() -> &'static AvroSchema {
    static SCHEMA: OnceLock<AvroSchema> = OnceLock::new();
    cached(&SCHEMA, HANDSHAKE_REQUEST_SCHEMA)
}

pub fn handshake_response_schema() -> &'static AvroSchema {
    static SCHEMA: OnceLock<AvroSchema> = OnceLock::new();
    cached(&SCHEMA, HANDSHAKE_RESPONSE_SCHEMA)
}

pub fn meta_schema() -> &'static AvroSchema {
    static SCHEMA: OnceLock<AvroSchema> = OnceLock::new();
    cached(&SCHEMA, META_SCHEMA)
}

/// Outcome of protocol negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeMatch {
    /// Both sides know each other's protocol.
    Both,
    /// The server knows the client's protocol; the client must learn the
    /// server's from this response.
    Client,
    /// The server does not know the client's protocol; the call must be
    /// resent with the client protocol attached.
    None,
}

impl HandshakeMatch {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeMatch::Both => "BOTH",
            HandshakeMatch::Client => "CLIENT",
            HandshakeMatch::None => "NONE",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "BOTH" => Some(HandshakeMatch::Both),
            "CLIENT" => Some(HandshakeMatch::Client),
            "NONE" => Some(HandshakeMatch::None),
            _ => None,
        }
    }
}

impl fmt::Display for HandshakeMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handshake sent by the requester ahead of a call.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeRequest {
    pub client_hash: ProtocolHash,
    /// Client protocol JSON, sent only when the server must learn it.
    pub client_protocol: Option<String>,
    pub server_hash: ProtocolHash,
    pub meta: Option<Meta>,
}

/// Handshake returned by the responder ahead of a call response.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeResponse {
    pub matching: HandshakeMatch,
    pub server_protocol: Option<String>,
    pub server_hash: Option<ProtocolHash>,
    pub meta: Option<Meta>,
}

impl HandshakeRequest {
    pub fn to_value(&self) -> Value {
        Record::new("org.apache.avro.ipc.HandshakeRequest")
            .with("clientHash", Value::Fixed(self.client_hash.to_vec()))
            .with("clientProtocol", self.client_protocol.clone())
            .with("serverHash", Value::Fixed(self.server_hash.to_vec()))
            .with("meta", meta_to_value(&self.meta))
            .into()
    }

    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        Ok(Self {
            client_hash: hash_field(value, "clientHash")?,
            client_protocol: optional_string(value, "clientProtocol")?,
            server_hash: hash_field(value, "serverHash")?,
            meta: meta_field(value)?,
        })
    }

    pub fn write(&self, encoder: &mut BinaryEncoder<'_>) -> Result<(), ProtocolError> {
        DatumWriter::new(handshake_request_schema().clone()).write(&self.to_value(), encoder)?;
        Ok(())
    }

    pub fn read(decoder: &mut BinaryDecoder<'_>) -> Result<Self, ProtocolError> {
        let value = DatumReader::new(handshake_request_schema().clone()).read(decoder)?;
        Self::from_value(&value)
    }
}

impl HandshakeResponse {
    pub fn to_value(&self) -> Value {
        Record::new("org.apache.avro.ipc.HandshakeResponse")
            .with("match", Value::Enum(self.matching.as_str().to_string()))
            .with("serverProtocol", self.server_protocol.clone())
            .with(
                "serverHash",
                self.server_hash.map(|h| Value::Fixed(h.to_vec())).unwrap_or(Value::Null),
            )
            .with("meta", meta_to_value(&self.meta))
            .into()
    }

    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let symbol = value
            .field("match")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::InvalidHandshake("missing match".into()))?;
        let matching = HandshakeMatch::from_symbol(symbol)
            .ok_or_else(|| ProtocolError::InvalidHandshake(format!("unknown match '{}'", symbol)))?;

        let server_hash = match value.field("serverHash") {
            None | Some(Value::Null) => None,
            Some(_) => Some(hash_field(value, "serverHash")?),
        };

        Ok(Self {
            matching,
            server_protocol: optional_string(value, "serverProtocol")?,
            server_hash,
            meta: meta_field(value)?,
        })
    }

    pub fn write(&self, encoder: &mut BinaryEncoder<'_>) -> Result<(), ProtocolError> {
        DatumWriter::new(handshake_response_schema().clone()).write(&self.to_value(), encoder)?;
        Ok(())
    }

    pub fn read(decoder: &mut BinaryDecoder<'_>) -> Result<Self, ProtocolError> {
        let value = DatumReader::new(handshake_response_schema().clone()).read(decoder)?;
        Self::from_value(&value)
    }
}

/// Writes an empty call metadata map.
pub fn write_call_meta(encoder: &mut BinaryEncoder<'_>) -> Result<(), ProtocolError> {
    DatumWriter::new(meta_schema().clone()).write(&Value::Map(BTreeMap::new()), encoder)?;
    Ok(())
}

/// Reads and discards call metadata.
pub fn read_call_meta(decoder: &mut BinaryDecoder<'_>) -> Result<Value, ProtocolError> {
    Ok(DatumReader::new(meta_schema().clone()).read(decoder)?)
}

fn meta_to_value(meta: &Option<Meta>) -> Value {
    match meta {
        Some(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), Value::Bytes(v.clone())))
                .collect(),
        ),
        None => Value::Null,
    }
}

fn hash_field(value: &Value, field: &str) -> Result<ProtocolHash, ProtocolError> {
    let bytes = value
        .field(field)
        .and_then(Value::as_bytes)
        .ok_or_else(|| ProtocolError::InvalidHandshake(format!("missing {}", field)))?;
    ProtocolHash::try_from(bytes)
        .map_err(|_| ProtocolError::InvalidHandshake(format!("{} must be 16 bytes", field)))
}

fn optional_string(value: &Value, field: &str) -> Result<Option<String>, ProtocolError> {
    match value.field(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ProtocolError::InvalidHandshake(format!("{} must be a string", field))),
    }
}

fn meta_field(value: &Value) -> Result<Option<Meta>, ProtocolError> {
    match value.field("meta") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Map(entries)) => entries
            .iter()
            .map(|(k, v)| match v {
                Value::Bytes(b) => Ok((k.clone(), b.clone())),
                _ => Err(ProtocolError::InvalidHandshake("meta values must be bytes".into())),
            })
            .collect::<Result<Meta, _>>()
            .map(Some),
        Some(_) => Err(ProtocolError::InvalidHandshake("meta must be a map".into())),
    }
}
