//! Database Parameter Buffer (DPB) encoding.
//!
//! A parameter buffer is a version byte followed by tagged items. The width
//! of each value is implied by the tag: a bare flag, a 1-byte value, a 2-byte
//! or 4-byte little-endian integer, or a string/byte span behind a 1-byte
//! length. The same codec backs the transaction parameter buffer (see
//! [`crate::tpb`]).
//!
//! The encoder performs no tag validation and never deduplicates: appending
//! the same tag twice emits two items, which the server treats additively.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// DPB item tags (`isc_dpb_*`).
pub mod tags {
    /// Buffer version; always the first byte.
    pub const VERSION1: u8 = 1;
    /// Database page size (create only).
    pub const PAGE_SIZE: u8 = 4;
    /// Number of page cache buffers.
    pub const NUM_BUFFERS: u8 = 5;
    /// Skip garbage collection for this attachment.
    pub const NO_GARBAGE_COLLECT: u8 = 16;
    /// Synchronous (forced) writes.
    pub const FORCE_WRITE: u8 = 24;
    /// Login name.
    pub const USER_NAME: u8 = 28;
    /// Plain-text password.
    pub const PASSWORD: u8 = 29;
    /// Connection character set.
    pub const LC_CTYPE: u8 = 48;
    /// Overwrite an existing file on create.
    pub const OVERWRITE: u8 = 54;
    /// Connect timeout in seconds.
    pub const CONNECT_TIMEOUT: u8 = 57;
    /// Keep-alive interval.
    pub const DUMMY_PACKET_INTERVAL: u8 = 58;
    /// SQL role.
    pub const SQL_ROLE_NAME: u8 = 60;
    /// Client SQL dialect.
    pub const SQL_DIALECT: u8 = 63;
    /// Default character set of a new database.
    pub const SET_DB_CHARSET: u8 = 68;
    /// Disable database-level triggers.
    pub const NO_DB_TRIGGERS: u8 = 72;
}

/// Longest value a single-byte length prefix can describe.
pub const MAX_ITEM_LEN: usize = u8::MAX as usize;

/// A typed parameter value; the variant decides the wire width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DpbValue {
    /// Tag only, no length or value.
    Flag,
    /// One byte behind a length of 1.
    Byte(u8),
    /// Little-endian 16-bit integer.
    Short(i16),
    /// Little-endian 32-bit integer.
    Int(i32),
    /// UTF-8 string behind a 1-byte length.
    String(String),
    /// Raw bytes behind a 1-byte length.
    Bytes(Vec<u8>),
}

/// Ordered, tagged parameter buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBuffer {
    buf: BytesMut,
}

impl ParameterBuffer {
    /// Create a DPB starting with [`tags::VERSION1`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_version(tags::VERSION1)
    }

    /// Create a buffer starting with the given version tag.
    #[must_use]
    pub fn with_version(version: u8) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(version);
        Self { buf }
    }

    /// Append a bare tag.
    pub fn append_flag(&mut self, tag: u8) -> &mut Self {
        self.buf.put_u8(tag);
        self
    }

    /// Append a single-byte value.
    pub fn append_byte(&mut self, tag: u8, value: u8) -> &mut Self {
        self.buf.put_u8(tag);
        self.buf.put_u8(1);
        self.buf.put_u8(value);
        self
    }

    /// Append a 2-byte little-endian value.
    pub fn append_short(&mut self, tag: u8, value: i16) -> &mut Self {
        self.buf.put_u8(tag);
        self.buf.put_u8(2);
        self.buf.put_i16_le(value);
        self
    }

    /// Append a 4-byte little-endian value.
    pub fn append_int(&mut self, tag: u8, value: i32) -> &mut Self {
        self.buf.put_u8(tag);
        self.buf.put_u8(4);
        self.buf.put_i32_le(value);
        self
    }

    /// Append a length-prefixed UTF-8 string.
    pub fn append_str(&mut self, tag: u8, value: &str) -> Result<&mut Self, ProtocolError> {
        self.append_bytes(tag, value.as_bytes())
    }

    /// Append a length-prefixed byte span.
    pub fn append_bytes(&mut self, tag: u8, value: &[u8]) -> Result<&mut Self, ProtocolError> {
        if value.len() > MAX_ITEM_LEN {
            return Err(ProtocolError::ParameterTooLong {
                tag,
                length: value.len(),
            });
        }
        self.buf.put_u8(tag);
        self.buf.put_u8(value.len() as u8);
        self.buf.put_slice(value);
        Ok(self)
    }

    /// Append a typed value.
    pub fn append(&mut self, tag: u8, value: &DpbValue) -> Result<&mut Self, ProtocolError> {
        match value {
            DpbValue::Flag => Ok(self.append_flag(tag)),
            DpbValue::Byte(v) => Ok(self.append_byte(tag, *v)),
            DpbValue::Short(v) => Ok(self.append_short(tag, *v)),
            DpbValue::Int(v) => Ok(self.append_int(tag, *v)),
            DpbValue::String(v) => self.append_str(tag, v),
            DpbValue::Bytes(v) => self.append_bytes(tag, v),
        }
    }

    /// Encoded length including the version byte.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when only the version byte is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.len() <= 1
    }

    /// Encoded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the buffer and return the encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Default for ParameterBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Split an encoded DPB into `(tag, value)` pairs.
///
/// Only valid for buffers whose items are all length-prefixed, which holds
/// for every item the connect and create requests emit.
pub fn parse_items(data: &[u8]) -> Result<(u8, Vec<(u8, Bytes)>), ProtocolError> {
    let (&version, mut rest) = data.split_first().ok_or(ProtocolError::UnexpectedEof)?;
    let mut items = Vec::new();
    while let Some((&tag, tail)) = rest.split_first() {
        let (&len, tail) = tail.split_first().ok_or(ProtocolError::UnexpectedEof)?;
        let len = usize::from(len);
        if tail.len() < len {
            return Err(ProtocolError::UnexpectedEof);
        }
        items.push((tag, Bytes::copy_from_slice(&tail[..len])));
        rest = &tail[len..];
    }
    Ok((version, items))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_version_is_first() {
        let dpb = ParameterBuffer::new();
        assert_eq!(dpb.as_bytes(), &[tags::VERSION1]);
        assert!(dpb.is_empty());
    }

    #[test]
    fn test_value_widths() {
        let mut dpb = ParameterBuffer::new();
        dpb.append_byte(tags::SQL_DIALECT, 3)
            .append_short(tags::FORCE_WRITE, 1)
            .append_int(tags::PAGE_SIZE, 8192);
        dpb.append_str(tags::USER_NAME, "SYSDBA").unwrap();

        assert_eq!(
            dpb.as_bytes(),
            &[
                1, // version
                63, 1, 3, // dialect
                24, 2, 1, 0, // forced writes
                4, 4, 0x00, 0x20, 0x00, 0x00, // page size
                28, 6, b'S', b'Y', b'S', b'D', b'B', b'A',
            ]
        );
    }

    #[test]
    fn test_duplicate_tags_are_kept() {
        let mut dpb = ParameterBuffer::new();
        dpb.append_int(tags::NUM_BUFFERS, 10)
            .append_int(tags::NUM_BUFFERS, 20);
        let (_, items) = parse_items(dpb.as_bytes()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].0, tags::NUM_BUFFERS);
        assert_eq!(items[1].0, tags::NUM_BUFFERS);
    }

    #[test]
    fn test_string_too_long() {
        let mut dpb = ParameterBuffer::new();
        let long = "x".repeat(256);
        assert!(matches!(
            dpb.append_str(tags::PASSWORD, &long),
            Err(ProtocolError::ParameterTooLong { tag: 29, length: 256 })
        ));
        // Nothing was written.
        assert_eq!(dpb.len(), 1);
    }

    #[test]
    fn test_typed_append_matches_direct() {
        let mut typed = ParameterBuffer::new();
        typed
            .append(tags::LC_CTYPE, &DpbValue::String("UTF8".into()))
            .unwrap();
        typed.append(tags::OVERWRITE, &DpbValue::Int(1)).unwrap();

        let mut direct = ParameterBuffer::new();
        direct.append_str(tags::LC_CTYPE, "UTF8").unwrap();
        direct.append_int(tags::OVERWRITE, 1);

        assert_eq!(typed, direct);
    }

    #[test]
    fn test_parse_items_truncated() {
        assert!(parse_items(&[1, 28, 5, b'a']).is_err());
        assert!(parse_items(&[]).is_err());
    }

    fn value_strategy() -> impl Strategy<Value = DpbValue> {
        prop_oneof![
            Just(DpbValue::Flag),
            any::<u8>().prop_map(DpbValue::Byte),
            any::<i16>().prop_map(DpbValue::Short),
            any::<i32>().prop_map(DpbValue::Int),
            "[a-zA-Z0-9]{0,40}".prop_map(DpbValue::String),
            proptest::collection::vec(any::<u8>(), 0..64).prop_map(DpbValue::Bytes),
        ]
    }

    proptest! {
        #[test]
        fn encoding_is_deterministic(
            items in proptest::collection::vec((any::<u8>(), value_strategy()), 0..24)
        ) {
            let encode = || {
                let mut dpb = ParameterBuffer::new();
                for (tag, value) in &items {
                    dpb.append(*tag, value).unwrap();
                }
                dpb.into_bytes()
            };
            prop_assert_eq!(encode(), encode());
        }
    }
}
