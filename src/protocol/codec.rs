//! Binary field primitives for the wire format.
//!
//! A frame carries a big-endian length prefix; the fields inside it are
//! little-endian length-prefixed byte runs. The getters consume from the
//! front of a shared slice so a message body can be decoded in one pass.

use crate::common::error::CodecError;
use bytes::{BufMut, BytesMut};

/// Split one byte off the front of `src`.
pub fn get_u8(src: &mut &[u8]) -> Result<u8, CodecError> {
    let (&b, rest) = src.split_first().ok_or(CodecError::Truncated)?;
    *src = rest;
    Ok(b)
}

/// Append a field as a 4-byte LE length followed by its bytes.
pub fn put_bytes(dst: &mut BytesMut, field: &[u8]) {
    dst.put_u32_le(field.len() as u32);
    dst.put_slice(field);
}

/// Split a length-prefixed field off the front of `src`, refusing any
/// field longer than `max_len`.
pub fn get_bytes_max(src: &mut &[u8], max_len: usize) -> Result<Vec<u8>, CodecError> {
    if src.len() < 4 {
        return Err(CodecError::Truncated);
    }
    let (head, rest) = src.split_at(4);
    let len = u32::from_le_bytes(head.try_into().unwrap()) as usize;

    if len > max_len {
        return Err(CodecError::Invalid("field too large"));
    }
    if rest.len() < len {
        return Err(CodecError::Truncated);
    }

    let (field, tail) = rest.split_at(len);
    *src = tail;
    Ok(field.to_vec())
}
