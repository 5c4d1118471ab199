//! Packed integers
//!
//! Counts and lengths are written seven bits per byte, least significant
//! group first. Every byte except the last has its high bit set. Only
//! non-negative `i32` values are representable, so a valid encoding is at
//! most five bytes long.

use crate::error::{ProtocolError, ProtocolResult};
use bytes::{Buf, BufMut};

/// Longest valid encoding of an `i32`
pub const MAX_PACKED_LEN: usize = 5;

/// Number of bytes `value` occupies when packed
pub fn packed_len(value: u32) -> usize {
    let mut len = 1;
    let mut rest = value >> 7;
    while rest > 0 {
        len += 1;
        rest >>= 7;
    }
    len
}

/// Write a packed integer
pub fn put_packed_int<B: BufMut>(buf: &mut B, value: i32) -> ProtocolResult<()> {
    if value < 0 {
        return Err(ProtocolError::PackedIntegerOutOfRange {
            value: value as i64,
        });
    }

    let mut rest = value as u32;
    while rest > 0x7F {
        buf.put_u8((rest as u8 & 0x7F) | 0x80);
        rest >>= 7;
    }
    buf.put_u8(rest as u8);
    Ok(())
}

/// Write a `usize` count as a packed integer
pub fn put_packed_len<B: BufMut>(buf: &mut B, len: usize) -> ProtocolResult<()> {
    let value = i32::try_from(len).map_err(|_| ProtocolError::PackedIntegerOutOfRange {
        value: len as i64,
    })?;
    put_packed_int(buf, value)
}

/// Read a packed integer
pub fn get_packed_int<B: Buf>(buf: &mut B) -> ProtocolResult<i32> {
    let mut value: u32 = 0;

    for index in 0..MAX_PACKED_LEN {
        if !buf.has_remaining() {
            return Err(ProtocolError::message_too_small(
                index + 1,
                index,
                "packed integer",
            ));
        }
        let byte = buf.get_u8();
        let shift = 7 * index as u32;

        if index == MAX_PACKED_LEN - 1 && byte > 0x07 {
            return Err(ProtocolError::invalid_packed_integer(
                "value exceeds i32 range",
            ));
        }

        value |= ((byte & 0x7F) as u32) << shift;

        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }

    Err(ProtocolError::invalid_packed_integer(format!(
        "more than {} bytes",
        MAX_PACKED_LEN
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use proptest::prelude::*;

    fn encode(value: i32) -> Vec<u8> {
        let mut buf = BytesMut::new();
        put_packed_int(&mut buf, value).unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_known_encodings() {
        assert_eq!(encode(0), vec![0x00]);
        assert_eq!(encode(127), vec![0x7F]);
        assert_eq!(encode(128), vec![0x80, 0x01]);
        assert_eq!(encode(300), vec![0xAC, 0x02]);
        assert_eq!(encode(i32::MAX), vec![0xFF, 0xFF, 0xFF, 0xFF, 0x07]);
    }

    #[test]
    fn test_negative_rejected() {
        let mut buf = BytesMut::new();
        assert_eq!(
            put_packed_int(&mut buf, -1),
            Err(ProtocolError::PackedIntegerOutOfRange { value: -1 })
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_truncated() {
        let mut input: &[u8] = &[0x80];
        let err = get_packed_int(&mut input).unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooSmall { .. }));
    }

    #[test]
    fn test_overlong_rejected() {
        let mut input: &[u8] = &[0xFF, 0xFF, 0xFF, 0xFF, 0x0F];
        assert!(matches!(
            get_packed_int(&mut input),
            Err(ProtocolError::InvalidPackedInteger { .. })
        ));

        let mut input: &[u8] = &[0x80, 0x80, 0x80, 0x80, 0x80, 0x00];
        assert!(get_packed_int(&mut input).is_err());
    }

    #[test]
    fn test_trailing_bytes_untouched() {
        let mut input: &[u8] = &[0xAC, 0x02, 0x42];
        assert_eq!(get_packed_int(&mut input).unwrap(), 300);
        assert_eq!(input, &[0x42]);
    }

    proptest! {
        #[test]
        fn prop_packed_len_matches_encoding(value in 0..=i32::MAX) {
            let encoded = encode(value);
            prop_assert_eq!(encoded.len(), packed_len(value as u32));
            let mut slice = encoded.as_slice();
            prop_assert_eq!(get_packed_int(&mut slice).unwrap(), value);
            prop_assert!(slice.is_empty());
        }
    }
}
