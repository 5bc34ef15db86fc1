//! Variable-length integer encoding.
//!
//! Integers are written as little-endian base-128 groups: each byte carries seven bits of the value, least significant
//! group first, and the high bit of a byte is set if and only if another byte follows it. Encodings are therefore
//! self-terminating, and the value zero is written as a single `0x00` byte.

use snafu::ensure;

use crate::error::{NegativeVarint, SketchError};

const CONTINUATION_BIT: u8 = 0x80;
const PAYLOAD_MASK: u64 = 0x7F;

/// Appends the varint encoding of a signed integer to `dst`.
///
/// # Errors
///
/// If `value` is negative, an error is returned and `dst` is left untouched.
pub fn encode_varint(value: i64, dst: &mut Vec<u8>) -> Result<(), SketchError> {
    ensure!(value >= 0, NegativeVarint { value });

    encode_varint_u64(value as u64, dst);
    Ok(())
}

/// Appends the varint encoding of an unsigned integer to `dst`.
pub fn encode_varint_u64(mut value: u64, dst: &mut Vec<u8>) {
    loop {
        let mut byte = (value & PAYLOAD_MASK) as u8;
        value >>= 7;
        if value != 0 {
            byte |= CONTINUATION_BIT;
        }
        dst.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Returns the number of bytes needed to encode `value` as a varint.
pub const fn encoded_len_varint(value: u64) -> usize {
    // Zero still takes a single byte, so treat it as if it had one significant bit.
    let significant_bits = (64 - (value | 1).leading_zeros()) as usize;
    significant_bits.div_ceil(7)
}
