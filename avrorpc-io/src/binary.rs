//! Avro binary primitives.
//!
//! Integers are zig-zag encoded and written as base-128 varints, low group
//! first. Floats and doubles are little-endian IEEE 754. Bytes and strings
//! carry a long length prefix.

use crate::error::{CodecError, IoError};
use crate::io::AvroIo;

/// Longest varint for a 64-bit value.
pub const MAX_VARINT_LEN: usize = 10;

pub fn zigzag_encode(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

pub fn zigzag_decode(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

/// Appends the zig-zag varint encoding of `n` to `buf`.
pub fn encode_long(n: i64, buf: &mut Vec<u8>) {
    let mut z = zigzag_encode(n);
    while z & !0x7f != 0 {
        buf.push((z & 0x7f) as u8 | 0x80);
        z >>= 7;
    }
    buf.push(z as u8);
}

/// Decodes a zig-zag varint from the front of `bytes`.
///
/// Returns the value and the number of bytes consumed, or `None` if the
/// input ends mid-varint or runs past ten bytes.
pub fn decode_long(bytes: &[u8]) -> Option<(i64, usize)> {
    let mut acc: u64 = 0;
    for (i, &b) in bytes.iter().take(MAX_VARINT_LEN).enumerate() {
        acc |= u64::from(b & 0x7f) << (7 * i);
        if b & 0x80 == 0 {
            return Some((zigzag_decode(acc), i + 1));
        }
    }
    None
}

/// Writes primitive values to a byte channel.
pub struct BinaryEncoder<'a> {
    io: &'a mut dyn AvroIo,
    scratch: Vec<u8>,
}

impl<'a> BinaryEncoder<'a> {
    pub fn new(io: &'a mut dyn AvroIo) -> Self {
        Self {
            io,
            scratch: Vec::with_capacity(MAX_VARINT_LEN),
        }
    }

    pub fn write_null(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    pub fn write_boolean(&mut self, b: bool) -> Result<(), CodecError> {
        self.write_raw(&[u8::from(b)])
    }

    pub fn write_int(&mut self, n: i32) -> Result<(), CodecError> {
        self.write_long(i64::from(n))
    }

    pub fn write_long(&mut self, n: i64) -> Result<(), CodecError> {
        self.scratch.clear();
        encode_long(n, &mut self.scratch);
        self.io.write(&self.scratch)?;
        Ok(())
    }

    pub fn write_float(&mut self, x: f32) -> Result<(), CodecError> {
        self.write_raw(&x.to_le_bytes())
    }

    pub fn write_double(&mut self, x: f64) -> Result<(), CodecError> {
        self.write_raw(&x.to_le_bytes())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.write_long(bytes.len() as i64)?;
        self.write_raw(bytes)
    }

    pub fn write_string(&mut self, s: &str) -> Result<(), CodecError> {
        self.write_bytes(s.as_bytes())
    }

    /// Writes bytes with no length prefix, as used for `fixed`.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.io.write(bytes)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), CodecError> {
        self.io.flush()?;
        Ok(())
    }
}

/// Reads primitive values from a byte channel.
pub struct BinaryDecoder<'a> {
    io: &'a mut dyn AvroIo,
}

impl<'a> BinaryDecoder<'a> {
    pub fn new(io: &'a mut dyn AvroIo) -> Self {
        Self { io }
    }

    pub fn read_null(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    pub fn read_boolean(&mut self) -> Result<bool, CodecError> {
        match self.read_byte()? {
            0 => Ok(false),
            1 => Ok(true),
            b => Err(CodecError::InvalidData(format!("invalid boolean byte 0x{:02x}", b))),
        }
    }

    pub fn read_int(&mut self) -> Result<i32, CodecError> {
        let n = self.read_long()?;
        i32::try_from(n).map_err(|_| CodecError::InvalidData(format!("int out of range: {}", n)))
    }

    pub fn read_long(&mut self) -> Result<i64, CodecError> {
        let mut acc: u64 = 0;
        for i in 0..MAX_VARINT_LEN {
            let b = self.read_byte()?;
            acc |= u64::from(b & 0x7f) << (7 * i);
            if b & 0x80 == 0 {
                return Ok(zigzag_decode(acc));
            }
        }
        Err(CodecError::InvalidData("varint longer than 10 bytes".into()))
    }

    pub fn read_float(&mut self) -> Result<f32, CodecError> {
        let mut buf = [0u8; 4];
        self.io.read_exact(&mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }

    pub fn read_double(&mut self) -> Result<f64, CodecError> {
        let mut buf = [0u8; 8];
        self.io.read_exact(&mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_length()?;
        self.read_fixed(len)
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|e| CodecError::InvalidData(format!("invalid UTF-8: {}", e)))
    }

    /// Reads exactly `size` bytes with no length prefix.
    pub fn read_fixed(&mut self, size: usize) -> Result<Vec<u8>, CodecError> {
        Ok(self.io.read(size)?)
    }

    pub fn skip_null(&mut self) -> Result<(), CodecError> {
        Ok(())
    }

    pub fn skip_boolean(&mut self) -> Result<(), CodecError> {
        self.skip(1)
    }

    pub fn skip_int(&mut self) -> Result<(), CodecError> {
        self.skip_long()
    }

    pub fn skip_long(&mut self) -> Result<(), CodecError> {
        self.read_long().map(|_| ())
    }

    pub fn skip_float(&mut self) -> Result<(), CodecError> {
        self.skip(4)
    }

    pub fn skip_double(&mut self) -> Result<(), CodecError> {
        self.skip(8)
    }

    pub fn skip_bytes(&mut self) -> Result<(), CodecError> {
        let len = self.read_length()?;
        self.skip(len as u64)
    }

    pub fn skip_string(&mut self) -> Result<(), CodecError> {
        self.skip_bytes()
    }

    pub fn skip_fixed(&mut self, size: usize) -> Result<(), CodecError> {
        self.skip(size as u64)
    }

    /// Discards `len` bytes of input.
    pub fn skip(&mut self, len: u64) -> Result<(), CodecError> {
        self.io.skip(len).map_err(|e| match e {
            IoError::InvalidSeek(_) => CodecError::Io(IoError::ShortRead {
                wanted: len as usize,
                got: 0,
            }),
            other => CodecError::Io(other),
        })
    }

    pub fn is_eof(&mut self) -> Result<bool, CodecError> {
        Ok(self.io.is_eof()?)
    }

    /// Bytes of input left to decode.
    pub fn remaining(&mut self) -> Result<u64, CodecError> {
        Ok(self.io.remaining()?)
    }

    fn read_byte(&mut self) -> Result<u8, CodecError> {
        let mut buf = [0u8; 1];
        self.io.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_length(&mut self) -> Result<usize, CodecError> {
        let len = self.read_long()?;
        usize::try_from(len).map_err(|_| CodecError::InvalidData(format!("negative length: {}", len)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryIo;
    use proptest::prelude::*;

    fn encode(f: impl FnOnce(&mut BinaryEncoder<'_>) -> Result<(), CodecError>) -> Vec<u8> {
        let mut io = MemoryIo::new();
        f(&mut BinaryEncoder::new(&mut io)).unwrap();
        io.into_inner()
    }

    fn decoder_over(bytes: &[u8]) -> MemoryIo {
        MemoryIo::from_bytes(bytes.to_vec())
    }

    #[test]
    fn test_zigzag() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(-2), 3);
        assert_eq!(zigzag_encode(i64::MAX), u64::MAX - 1);
        assert_eq!(zigzag_encode(i64::MIN), u64::MAX);
    }

    #[test]
    fn test_known_encodings() {
        assert_eq!(encode(|e| e.write_int(0)), [0x00]);
        assert_eq!(encode(|e| e.write_int(-1)), [0x01]);
        assert_eq!(encode(|e| e.write_int(1)), [0x02]);
        assert_eq!(encode(|e| e.write_int(-64)), [0x7f]);
        assert_eq!(encode(|e| e.write_int(64)), [0x80, 0x01]);
        assert_eq!(
            encode(|e| e.write_int(i32::MIN)),
            [0xff, 0xff, 0xff, 0xff, 0x0f]
        );
        assert_eq!(
            encode(|e| e.write_long(i64::MIN)),
            [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]
        );
        assert_eq!(encode(|e| e.write_string("foo")), [0x06, 0x66, 0x6f, 0x6f]);
        assert_eq!(encode(|e| e.write_boolean(true)), [0x01]);
        assert_eq!(encode(|e| e.write_float(1.0)), [0x00, 0x00, 0x80, 0x3f]);
        assert_eq!(
            encode(|e| e.write_double(1.0)),
            [0, 0, 0, 0, 0, 0, 0xf0, 0x3f]
        );
    }

    #[test]
    fn test_huge_length_prefix_is_short_read() {
        let mut bytes = Vec::new();
        encode_long(1 << 40, &mut bytes);
        let mut io = decoder_over(&bytes);
        let mut dec = BinaryDecoder::new(&mut io);
        assert!(matches!(
            dec.read_bytes(),
            Err(CodecError::Io(IoError::ShortRead { got: 0, .. }))
        ));

        let mut bytes = Vec::new();
        encode_long(i64::MAX / 2, &mut bytes);
        bytes.extend_from_slice(b"abc");
        let mut io = decoder_over(&bytes);
        let mut dec = BinaryDecoder::new(&mut io);
        assert!(matches!(
            dec.read_string(),
            Err(CodecError::Io(IoError::ShortRead { got: 3, .. }))
        ));
    }

    #[test]
    fn test_read_primitives() {
        let bytes = encode(|e| {
            e.write_boolean(false)?;
            e.write_int(-300)?;
            e.write_long(1 << 40)?;
            e.write_float(2.5)?;
            e.write_double(-0.125)?;
            e.write_bytes(&[1, 2, 3])?;
            e.write_string("héllo")?;
            e.write_raw(b"fx")
        });

        let mut io = decoder_over(&bytes);
        let mut d = BinaryDecoder::new(&mut io);
        assert!(!d.read_boolean().unwrap());
        assert_eq!(d.read_int().unwrap(), -300);
        assert_eq!(d.read_long().unwrap(), 1 << 40);
        assert_eq!(d.read_float().unwrap(), 2.5);
        assert_eq!(d.read_double().unwrap(), -0.125);
        assert_eq!(d.read_bytes().unwrap(), vec![1, 2, 3]);
        assert_eq!(d.read_string().unwrap(), "héllo");
        assert_eq!(d.read_fixed(2).unwrap(), b"fx");
        assert!(d.is_eof().unwrap());
    }

    #[test]
    fn test_skips() {
        let bytes = encode(|e| {
            e.write_boolean(true)?;
            e.write_long(-123456789)?;
            e.write_float(1.0)?;
            e.write_double(1.0)?;
            e.write_string("skipped")?;
            e.write_raw(&[9; 5])?;
            e.write_int(7)
        });

        let mut io = decoder_over(&bytes);
        let mut d = BinaryDecoder::new(&mut io);
        d.skip_boolean().unwrap();
        d.skip_long().unwrap();
        d.skip_float().unwrap();
        d.skip_double().unwrap();
        d.skip_string().unwrap();
        d.skip_fixed(5).unwrap();
        assert_eq!(d.read_int().unwrap(), 7);
    }

    #[test]
    fn test_truncated_input() {
        let mut io = decoder_over(&[0x80]);
        let err = BinaryDecoder::new(&mut io).read_long().unwrap_err();
        assert!(err.is_io());

        let mut io = decoder_over(&[0x06, b'f']);
        assert!(BinaryDecoder::new(&mut io).read_string().unwrap_err().is_io());

        let mut io = decoder_over(&[0x06, b'f']);
        assert!(BinaryDecoder::new(&mut io).skip_string().unwrap_err().is_io());
    }

    #[test]
    fn test_invalid_data() {
        let mut io = decoder_over(&[0x02]);
        assert!(matches!(
            BinaryDecoder::new(&mut io).read_boolean(),
            Err(CodecError::InvalidData(_))
        ));

        let mut io = decoder_over(&[0x01]);
        assert!(matches!(
            BinaryDecoder::new(&mut io).read_bytes(),
            Err(CodecError::InvalidData(_))
        ));

        let mut io = decoder_over(&[0xff; 11]);
        assert!(matches!(
            BinaryDecoder::new(&mut io).read_long(),
            Err(CodecError::InvalidData(_))
        ));

        let long_value = encode(|e| e.write_long(i64::from(i32::MAX) + 1));
        let mut io = decoder_over(&long_value);
        assert!(matches!(
            BinaryDecoder::new(&mut io).read_int(),
            Err(CodecError::InvalidData(_))
        ));

        let mut io = decoder_over(&[0x04, 0xff, 0xfe]);
        assert!(matches!(
            BinaryDecoder::new(&mut io).read_string(),
            Err(CodecError::InvalidData(_))
        ));
    }

    #[test]
    fn test_slice_decode() {
        let mut buf = Vec::new();
        encode_long(-64, &mut buf);
        encode_long(64, &mut buf);
        assert_eq!(decode_long(&buf), Some((-64, 1)));
        assert_eq!(decode_long(&buf[1..]), Some((64, 2)));
        assert_eq!(decode_long(&[0x80]), None);
    }

    proptest! {
        #[test]
        fn prop_long_roundtrip(n in any::<i64>()) {
            let bytes = encode(|e| e.write_long(n));
            prop_assert!(bytes.len() <= MAX_VARINT_LEN);
            let mut io = MemoryIo::from_bytes(bytes);
            prop_assert_eq!(BinaryDecoder::new(&mut io).read_long().unwrap(), n);
        }

        #[test]
        fn prop_int_matches_long_encoding(n in any::<i32>()) {
            prop_assert_eq!(
                encode(|e| e.write_int(n)),
                encode(|e| e.write_long(i64::from(n)))
            );
        }
    }
}
