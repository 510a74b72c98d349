//! # avrorpc-protocol
//!
//! Avro protocol model and wire framing for avrorpc.
//!
//! This crate provides:
//! - Protocol and message definitions parsed from JSON, with MD5 identity
//! - Handshake request/response records and their fixed schemas
//! - Plain and serial message framing over byte streams

pub mod codec;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod protocol;

pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use frame::{Envelope, FramingMode, FRAME_LENGTH_SIZE, SERIAL_HEADER_SIZE};
pub use handshake::{
    handshake_request_schema, handshake_response_schema, meta_schema, read_call_meta,
    write_call_meta, HandshakeMatch, HandshakeRequest, HandshakeResponse, Meta,
};
pub use protocol::{Message, Protocol, ProtocolHash};

/// Default port for avrorpc servers.
pub const DEFAULT_PORT: u16 = 9090;

/// Largest frame written; longer messages are split.
pub const BUFFER_SIZE: usize = 8192;

/// Maximum message payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Maximum frame count accepted in a serial-framed message.
pub const MAX_FRAMES: u32 = 65536;
