//! Message framing for byte-stream transports.
//!
//! Plain framing writes a message as length-prefixed frames followed by a
//! zero-length frame:
//!
//! ```text
//! +-----------+-------------+-----+-----------+
//! | len (u32) | len bytes   | ... | 0 (u32)   |
//! +-----------+-------------+-----+-----------+
//! ```
//!
//! Serial framing prefixes a request serial and the frame count, and has
//! no terminator:
//!
//! ```text
//! +--------------+-------------------+-----------+-----------+-----+
//! | serial (u32) | frame_count (u32) | len (u32) | len bytes | ... |
//! +--------------+-------------------+-----------+-----------+-----+
//! ```
//!
//! All integers are big-endian.

use crate::error::ProtocolError;
use crate::{BUFFER_SIZE, MAX_FRAMES, MAX_PAYLOAD_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;

/// Size of a frame length prefix.
pub const FRAME_LENGTH_SIZE: usize = 4;

/// Size of the serial framing header (serial + frame count).
pub const SERIAL_HEADER_SIZE: usize = 8;

/// Framing scheme used on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramingMode {
    /// Length-prefixed frames ended by a zero-length frame.
    #[default]
    Plain,
    /// Serial number and frame count, then length-prefixed frames.
    Serial,
}

impl FramingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FramingMode::Plain => "plain",
            FramingMode::Serial => "serial",
        }
    }
}

impl fmt::Display for FramingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FramingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" => Ok(FramingMode::Plain),
            "serial" => Ok(FramingMode::Serial),
            other => Err(format!("unknown framing mode '{}'", other)),
        }
    }
}

/// A framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Request serial; always set under serial framing.
    pub serial: Option<u32>,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            serial: None,
            payload: payload.into(),
        }
    }

    pub fn with_serial(serial: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            serial: Some(serial),
            payload: payload.into(),
        }
    }

    /// Encodes the envelope under `mode`.
    pub fn encode(&self, mode: FramingMode) -> Result<BytesMut, ProtocolError> {
        let size = self.payload.len();
        if size > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let frame_count = size.div_ceil(BUFFER_SIZE);
        let mut buf = BytesMut::with_capacity(
            SERIAL_HEADER_SIZE + size + (frame_count + 1) * FRAME_LENGTH_SIZE,
        );

        if mode == FramingMode::Serial {
            buf.put_u32(self.serial.unwrap_or(0));
            buf.put_u32(frame_count as u32);
        }

        for chunk in self.payload.chunks(BUFFER_SIZE) {
            buf.put_u32(chunk.len() as u32);
            buf.put_slice(chunk);
        }

        if mode == FramingMode::Plain {
            buf.put_u32(0);
        }
        Ok(buf)
    }

    /// Decodes one envelope from the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when the message is
    /// not complete yet.
    pub fn decode(buf: &mut BytesMut, mode: FramingMode) -> Result<Option<Self>, ProtocolError> {
        match mode {
            FramingMode::Plain => decode_plain(buf),
            FramingMode::Serial => decode_serial(buf),
        }
    }
}

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    let bytes = buf.get(at..at + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn check_size(size: usize) -> Result<(), ProtocolError> {
    if size > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    Ok(())
}

fn decode_plain(buf: &mut BytesMut) -> Result<Option<Envelope>, ProtocolError> {
    // Peek every frame header before consuming anything.
    let mut offset = 0;
    let mut total = 0;
    loop {
        let Some(len) = read_u32(buf, offset) else {
            return Ok(None);
        };
        let len = len as usize;
        offset += FRAME_LENGTH_SIZE;
        if len == 0 {
            break;
        }
        total += len;
        check_size(total)?;
        if buf.len() < offset + len {
            return Ok(None);
        }
        offset += len;
    }

    let mut payload = BytesMut::with_capacity(total);
    loop {
        let len = buf.get_u32() as usize;
        if len == 0 {
            break;
        }
        payload.extend_from_slice(&buf[..len]);
        buf.advance(len);
    }
    Ok(Some(Envelope::new(payload.freeze())))
}

fn decode_serial(buf: &mut BytesMut) -> Result<Option<Envelope>, ProtocolError> {
    let (Some(serial), Some(frame_count)) = (read_u32(buf, 0), read_u32(buf, 4)) else {
        return Ok(None);
    };
    if frame_count > MAX_FRAMES {
        return Err(ProtocolError::TooManyFrames(frame_count));
    }

    let mut offset = SERIAL_HEADER_SIZE;
    let mut total = 0;
    for _ in 0..frame_count {
        let Some(len) = read_u32(buf, offset) else {
            return Ok(None);
        };
        let len = len as usize;
        total += len;
        check_size(total)?;
        offset += FRAME_LENGTH_SIZE;
        if buf.len() < offset + len {
            return Ok(None);
        }
        offset += len;
    }

    buf.advance(SERIAL_HEADER_SIZE);
    let mut payload = BytesMut::with_capacity(total);
    for _ in 0..frame_count {
        let len = buf.get_u32() as usize;
        payload.extend_from_slice(&buf[..len]);
        buf.advance(len);
    }
    Ok(Some(Envelope::with_serial(serial, payload.freeze())))
}
