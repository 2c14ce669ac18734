//! Codec error types.

use thiserror::Error;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// IO error during read/write operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol-level error from fb-protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] fb_protocol::ProtocolError),

    /// A partial message grew beyond the configured limit.
    #[error("message too large: {size} bytes buffered (max {max})")]
    MessageTooLarge {
        /// Bytes buffered so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Connection closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,
}
