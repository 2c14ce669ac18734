//! # fb-protocol
//!
//! Pure implementation of the Firebird remote wire protocol pieces needed to
//! establish sessions and coordinate transactions.
//!
//! This crate performs no I/O. It provides:
//!
//! - XDR primitives ([`xdr`])
//! - Operation codes ([`opcode`])
//! - Database and transaction parameter buffers ([`dpb`], [`tpb`])
//! - The character set registry ([`charset`])
//! - The connect handshake and request/response messages ([`connect`], [`message`])
//! - Status vectors with server message rendering ([`status`])
//! - Database info items ([`info`])
//!
//! ## Example
//!
//! ```
//! use fb_protocol::dpb::{ParameterBuffer, tags};
//!
//! let mut dpb = ParameterBuffer::new();
//! dpb.append_byte(tags::SQL_DIALECT, 3);
//! dpb.append_str(tags::USER_NAME, "SYSDBA").unwrap();
//!
//! assert_eq!(dpb.as_bytes()[0], tags::VERSION1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod charset;
pub mod connect;
pub mod dpb;
pub mod error;
pub mod info;
pub mod message;
pub mod opcode;
pub mod status;
pub mod tpb;
pub mod xdr;

pub use charset::Charset;
pub use connect::{AcceptResponse, ConnectRequest, ProtocolVersion};
pub use dpb::{DpbValue, ParameterBuffer};
pub use error::ProtocolError;
pub use message::{GenericResponse, Request, ServerPacket};
pub use opcode::Operation;
pub use status::{StatusArg, StatusVector, StatusWarning};
pub use tpb::TransactionFlags;
