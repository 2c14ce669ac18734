//! Database information items (`op_info_database`).
//!
//! Answers are clumplets: item byte, 2-byte little-endian length, value;
//! terminated by [`items::END`].

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Info item tags (`isc_info_*`).
pub mod items {
    /// End of the answer.
    pub const END: u8 = 1;
    /// Answer did not fit the buffer.
    pub const TRUNCATED: u8 = 2;
    /// Item not understood by the server.
    pub const ERROR: u8 = 3;
    /// Server implementation version strings.
    pub const ISC_VERSION: u8 = 12;
    /// Page size in bytes.
    pub const PAGE_SIZE: u8 = 14;
    /// Database SQL dialect.
    pub const DB_SQL_DIALECT: u8 = 62;
    /// Firebird server version strings.
    pub const FIREBIRD_VERSION: u8 = 103;
}

/// Items requested for server version discovery.
pub const VERSION_ITEMS: [u8; 3] = [items::ISC_VERSION, items::FIREBIRD_VERSION, items::END];

/// Values decoded from an info answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseInfo {
    /// `isc_info_isc_version` strings.
    pub isc_version: Vec<String>,
    /// `isc_info_firebird_version` strings.
    pub firebird_version: Vec<String>,
    /// Page size.
    pub page_size: Option<u32>,
    /// SQL dialect of the database.
    pub dialect: Option<u8>,
}

impl DatabaseInfo {
    /// Parse an info answer, ignoring items this type does not model.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut info = Self::default();
        for (item, value) in parse_items(data)? {
            match item {
                items::ISC_VERSION => info.isc_version = version_strings(&value)?,
                items::FIREBIRD_VERSION => info.firebird_version = version_strings(&value)?,
                items::PAGE_SIZE => info.page_size = Some(vax_integer(&value) as u32),
                items::DB_SQL_DIALECT => info.dialect = Some(vax_integer(&value) as u8),
                _ => {}
            }
        }
        Ok(info)
    }

    /// Most descriptive version string available.
    #[must_use]
    pub fn server_version(&self) -> Option<&str> {
        self.firebird_version
            .first()
            .or_else(|| self.isc_version.first())
            .map(String::as_str)
    }
}

/// Split an info answer into items, stopping at [`items::END`].
pub fn parse_items(mut data: &[u8]) -> Result<Vec<(u8, Bytes)>, ProtocolError> {
    let mut out = Vec::new();
    while let Some((&item, rest)) = data.split_first() {
        if item == items::END {
            break;
        }
        if item == items::TRUNCATED {
            return Err(ProtocolError::InvalidField {
                field: "info answer",
                value: i64::from(item),
            });
        }
        if rest.len() < 2 {
            return Err(ProtocolError::UnexpectedEof);
        }
        let len = usize::from(u16::from_le_bytes([rest[0], rest[1]]));
        let rest = &rest[2..];
        if rest.len() < len {
            return Err(ProtocolError::UnexpectedEof);
        }
        out.push((item, Bytes::copy_from_slice(&rest[..len])));
        data = &rest[len..];
    }
    Ok(out)
}

/// Encode an info answer.
#[must_use]
pub fn encode_items(entries: &[(u8, &[u8])]) -> Bytes {
    let mut buf = BytesMut::new();
    for (item, value) in entries {
        buf.put_u8(*item);
        buf.put_u16_le(value.len() as u16);
        buf.put_slice(value);
    }
    buf.put_u8(items::END);
    buf.freeze()
}

/// Encode a list of version strings as carried by the version items.
#[must_use]
pub fn encode_version_strings(versions: &[&str]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(versions.len() as u8);
    for v in versions {
        buf.put_u8(v.len() as u8);
        buf.put_slice(v.as_bytes());
    }
    buf.freeze()
}

fn version_strings(value: &[u8]) -> Result<Vec<String>, ProtocolError> {
    let (&count, mut rest) = value.split_first().ok_or(ProtocolError::UnexpectedEof)?;
    let mut out = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let (&len, tail) = rest.split_first().ok_or(ProtocolError::UnexpectedEof)?;
        let len = usize::from(len);
        if tail.len() < len {
            return Err(ProtocolError::UnexpectedEof);
        }
        out.push(String::from_utf8_lossy(&tail[..len]).into_owned());
        rest = &tail[len..];
    }
    Ok(out)
}

/// Little-endian integer of 1 to 8 bytes.
fn vax_integer(value: &[u8]) -> u64 {
    value
        .iter()
        .take(8)
        .rev()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}
