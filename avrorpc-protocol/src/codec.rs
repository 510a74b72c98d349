//! Buffered encoder and decoder for framed messages.

use crate::error::ProtocolError;
use crate::frame::{Envelope, FramingMode};
use crate::BUFFER_SIZE;
use bytes::{Bytes, BytesMut};

/// Encodes messages under a fixed framing mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct Encoder {
    mode: FramingMode,
}

impl Encoder {
    pub fn new(mode: FramingMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Encodes a message with an optional request serial.
    pub fn encode(&self, serial: Option<u32>, payload: &[u8]) -> Result<BytesMut, ProtocolError> {
        Envelope {
            serial,
            payload: Bytes::copy_from_slice(payload),
        }
        .encode(self.mode)
    }
}

/// Accumulates stream bytes and yields complete messages.
pub struct Decoder {
    mode: FramingMode,
    buffer: BytesMut,
}

impl Decoder {
    pub fn new(mode: FramingMode) -> Self {
        Self {
            mode,
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
        }
    }

    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next message from the buffer.
    pub fn decode_message(&mut self) -> Result<Option<Envelope>, ProtocolError> {
        Envelope::decode(&mut self.buffer, self.mode)
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
