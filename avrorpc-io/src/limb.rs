//! Long encoding over 32-bit halves.
//!
//! Produces the same bytes as [`crate::binary::encode_long`] while only ever
//! doing 32-bit arithmetic, for hosts or callers that carry longs as a pair
//! of words.

use crate::binary::MAX_VARINT_LEN;

/// A 64-bit two's-complement integer split into high and low words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Limbs {
    pub hi: u32,
    pub lo: u32,
}

impl Limbs {
    pub fn new(hi: u32, lo: u32) -> Self {
        Self { hi, lo }
    }

    pub fn from_i64(n: i64) -> Self {
        let bits = n as u64;
        Self {
            hi: (bits >> 32) as u32,
            lo: bits as u32,
        }
    }

    pub fn to_i64(self) -> i64 {
        ((u64::from(self.hi) << 32) | u64::from(self.lo)) as i64
    }

    fn is_zero(self) -> bool {
        self.hi == 0 && self.lo == 0
    }

    fn shift_left_1(self) -> Self {
        Self {
            hi: (self.hi << 1) | (self.lo >> 31),
            lo: self.lo << 1,
        }
    }

    fn shift_right_logical(self, bits: u32) -> Self {
        debug_assert!(bits > 0 && bits < 32);
        Self {
            hi: self.hi >> bits,
            lo: (self.lo >> bits) | (self.hi << (32 - bits)),
        }
    }

    fn xor_word(self, mask: u32) -> Self {
        Self {
            hi: self.hi ^ mask,
            lo: self.lo ^ mask,
        }
    }
}

/// Appends the zig-zag varint encoding of `n` to `buf`.
pub fn encode_long_limbs(n: Limbs, buf: &mut Vec<u8>) {
    let sign = if n.hi & 0x8000_0000 != 0 { u32::MAX } else { 0 };
    let mut z = n.shift_left_1().xor_word(sign);
    loop {
        let group = (z.lo & 0x7f) as u8;
        z = z.shift_right_logical(7);
        if z.is_zero() {
            buf.push(group);
            return;
        }
        buf.push(group | 0x80);
    }
}

/// Decodes a zig-zag varint from the front of `bytes`.
///
/// Returns the value and bytes consumed, or `None` when the varint is
/// unterminated within ten bytes.
pub fn decode_long_limbs(bytes: &[u8]) -> Option<(Limbs, usize)> {
    let mut acc = Limbs::default();
    for (i, &b) in bytes.iter().take(MAX_VARINT_LEN).enumerate() {
        let group = u32::from(b & 0x7f);
        let shift = 7 * i as u32;
        if shift < 32 {
            acc.lo |= group << shift;
            if shift > 25 {
                acc.hi |= group >> (32 - shift);
            }
        } else {
            acc.hi |= group << (shift - 32);
        }
        if b & 0x80 == 0 {
            let mask = if acc.lo & 1 == 1 { u32::MAX } else { 0 };
            let n = acc.shift_right_logical(1).xor_word(mask);
            return Some((n, i + 1));
        }
    }
    None
}
