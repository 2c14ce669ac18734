//! # fb-codec
//!
//! Async framing layer for the Firebird remote protocol.
//!
//! The remote protocol has no packet header: messages are self-delimiting
//! XDR structures. This crate turns a raw byte stream into whole messages by
//! attempting a decode and waiting for more input whenever the buffer ends
//! mid-message.
//!
//! ## Features
//!
//! - Client-side codec (encodes requests, decodes server packets)
//! - Server-side codec for test servers (the mirror image)
//! - Message reassembly across TCP segment boundaries
//! - Integration with tokio-util's codec framework

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod framed;
pub mod packet_codec;

pub use error::CodecError;
pub use framed::PacketStream;
pub use packet_codec::{ClientCodec, ServerCodec};
