//! XDR primitives used by the Firebird remote protocol.
//!
//! Every integer on the wire is a 4-byte big-endian word. Opaque data and
//! strings are a 4-byte length followed by the bytes, zero-padded to the next
//! 4-byte boundary.

use bytes::{Buf, BufMut, Bytes};

use crate::error::ProtocolError;

/// Largest opaque field the decoder accepts.
pub const MAX_OPAQUE_LEN: usize = 16 * 1024 * 1024;

const PADDING: [u8; 4] = [0; 4];

/// Number of padding bytes that follow `len` bytes of opaque data.
#[must_use]
pub const fn pad_len(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

/// Write a 4-byte integer.
pub fn put_i32(dst: &mut impl BufMut, value: i32) {
    dst.put_i32(value);
}

/// Write a 4-byte unsigned integer.
pub fn put_u32(dst: &mut impl BufMut, value: u32) {
    dst.put_u32(value);
}

/// Write length-prefixed, padded opaque data.
pub fn put_opaque(dst: &mut impl BufMut, data: &[u8]) {
    dst.put_u32(data.len() as u32);
    dst.put_slice(data);
    dst.put_slice(&PADDING[..pad_len(data.len())]);
}

/// Write a string as opaque data.
pub fn put_str(dst: &mut impl BufMut, value: &str) {
    put_opaque(dst, value.as_bytes());
}

fn ensure(src: &impl Buf, needed: usize) -> Result<(), ProtocolError> {
    if src.remaining() < needed {
        Err(ProtocolError::UnexpectedEof)
    } else {
        Ok(())
    }
}

/// Read a 4-byte integer.
pub fn get_i32(src: &mut impl Buf) -> Result<i32, ProtocolError> {
    ensure(src, 4)?;
    Ok(src.get_i32())
}

/// Read a 4-byte unsigned integer.
pub fn get_u32(src: &mut impl Buf) -> Result<u32, ProtocolError> {
    ensure(src, 4)?;
    Ok(src.get_u32())
}

/// Read an 8-byte quad (blob ids and similar).
pub fn get_u64(src: &mut impl Buf) -> Result<u64, ProtocolError> {
    ensure(src, 8)?;
    Ok(src.get_u64())
}

/// Read length-prefixed, padded opaque data.
pub fn get_opaque(src: &mut impl Buf) -> Result<Bytes, ProtocolError> {
    let raw = get_i32(src)?;
    let len = usize::try_from(raw).map_err(|_| ProtocolError::InvalidLength(raw))?;
    if len > MAX_OPAQUE_LEN {
        return Err(ProtocolError::BufferTooLarge {
            length: len,
            max: MAX_OPAQUE_LEN,
        });
    }
    let padding = pad_len(len);
    ensure(src, len + padding)?;
    let data = src.copy_to_bytes(len);
    src.advance(padding);
    Ok(data)
}

/// Read a UTF-8 string stored as opaque data.
pub fn get_string(src: &mut impl Buf) -> Result<String, ProtocolError> {
    let data = get_opaque(src)?;
    String::from_utf8(data.to_vec()).map_err(|e| ProtocolError::StringEncoding(e.to_string()))
}
