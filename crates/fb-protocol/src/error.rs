//! Protocol-level error types.

use thiserror::Error;

/// Errors that can occur while encoding or decoding Firebird wire data.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Unexpected end of input while decoding.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// The server sent an operation code the client does not understand.
    #[error("unexpected operation code: {0}")]
    UnexpectedOperation(i32),

    /// Parameter buffer value does not fit the single-byte length prefix.
    #[error("parameter {tag} is too long: {length} bytes (max 255)")]
    ParameterTooLong {
        /// Parameter tag.
        tag: u8,
        /// Actual value length.
        length: usize,
    },

    /// Length-prefixed field exceeds the maximum the decoder accepts.
    #[error("buffer too large: {length} bytes (max {max})")]
    BufferTooLarge {
        /// Declared length.
        length: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// Negative length on the wire.
    #[error("invalid length: {0}")]
    InvalidLength(i32),

    /// Charset name not present in the registry.
    #[error("unknown character set: {0}")]
    UnknownCharset(String),

    /// The server accepted a protocol version the client never offered.
    #[error("unsupported protocol version: {0:#x}")]
    UnsupportedVersion(u32),

    /// String data was not valid UTF-8.
    #[error("string encoding error: {0}")]
    StringEncoding(String),

    /// Invalid field value in a protocol structure.
    #[error("invalid {field} value: {value}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Invalid value.
        value: i64,
    },
}
