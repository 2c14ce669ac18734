//! Request and response messages.
//!
//! The remote protocol has no outer framing: each message is an operation
//! code followed by its XDR-encoded fields. Decoders therefore return
//! [`ProtocolError::UnexpectedEof`] when the input holds only part of a
//! message, and the caller retries once more bytes arrive.

use bytes::{Buf, Bytes, BytesMut};

use crate::connect::{AcceptResponse, ConnectRequest};
use crate::error::ProtocolError;
use crate::opcode::Operation;
use crate::status::StatusVector;
use crate::xdr;

/// Auxiliary connection request type for event delivery.
pub const P_REQ_ASYNC: i32 = 1;
/// `op_free_statement` option: close the cursor only.
pub const DSQL_CLOSE: i32 = 1;
/// `op_free_statement` option: release the statement.
pub const DSQL_DROP: i32 = 2;

/// A request sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `op_connect`.
    Connect(ConnectRequest),
    /// `op_attach`.
    Attach {
        /// Database path.
        database: String,
        /// Encoded DPB.
        dpb: Bytes,
    },
    /// `op_create`.
    Create {
        /// Database path.
        database: String,
        /// Encoded DPB.
        dpb: Bytes,
    },
    /// `op_detach`.
    Detach {
        /// Database handle.
        db_handle: u32,
    },
    /// `op_drop_database`.
    DropDatabase {
        /// Database handle.
        db_handle: u32,
    },
    /// `op_transaction`.
    Transaction {
        /// Database handle.
        db_handle: u32,
        /// Encoded TPB.
        tpb: Bytes,
    },
    /// `op_commit`.
    Commit {
        /// Transaction handle.
        tr_handle: u32,
    },
    /// `op_rollback`.
    Rollback {
        /// Transaction handle.
        tr_handle: u32,
    },
    /// `op_commit_retaining`.
    CommitRetaining {
        /// Transaction handle.
        tr_handle: u32,
    },
    /// `op_rollback_retaining`.
    RollbackRetaining {
        /// Transaction handle.
        tr_handle: u32,
    },
    /// `op_prepare2`.
    Prepare2 {
        /// Transaction handle.
        tr_handle: u32,
        /// Recovery message stored with the limbo transaction.
        message: Bytes,
    },
    /// `op_info_database`.
    InfoDatabase {
        /// Database handle.
        db_handle: u32,
        /// Requested info items.
        items: Bytes,
        /// Maximum size of the answer.
        buffer_length: u32,
    },
    /// `op_connect_request`.
    ConnectRequest {
        /// Request type, [`P_REQ_ASYNC`] for events.
        kind: i32,
        /// Database handle.
        db_handle: u32,
    },
    /// `op_free_statement`.
    FreeStatement {
        /// Statement handle.
        stmt_handle: u32,
        /// [`DSQL_CLOSE`] or [`DSQL_DROP`].
        option: i32,
    },
    /// `op_disconnect`.
    Disconnect,
}

impl Request {
    /// Operation code of this request.
    #[must_use]
    pub fn operation(&self) -> Operation {
        match self {
            Self::Connect(_) => Operation::Connect,
            Self::Attach { .. } => Operation::Attach,
            Self::Create { .. } => Operation::Create,
            Self::Detach { .. } => Operation::Detach,
            Self::DropDatabase { .. } => Operation::DropDatabase,
            Self::Transaction { .. } => Operation::Transaction,
            Self::Commit { .. } => Operation::Commit,
            Self::Rollback { .. } => Operation::Rollback,
            Self::CommitRetaining { .. } => Operation::CommitRetaining,
            Self::RollbackRetaining { .. } => Operation::RollbackRetaining,
            Self::Prepare2 { .. } => Operation::Prepare2,
            Self::InfoDatabase { .. } => Operation::InfoDatabase,
            Self::ConnectRequest { .. } => Operation::ConnectRequest,
            Self::FreeStatement { .. } => Operation::FreeStatement,
            Self::Disconnect => Operation::Disconnect,
        }
    }

    /// Encode the request, operation code included.
    pub fn encode(&self, dst: &mut BytesMut) {
        xdr::put_i32(dst, self.operation().code());
        match self {
            Self::Connect(connect) => connect.encode_body(dst),
            Self::Attach { database, dpb } | Self::Create { database, dpb } => {
                xdr::put_i32(dst, 0);
                xdr::put_str(dst, database);
                xdr::put_opaque(dst, dpb);
            }
            Self::Detach { db_handle } | Self::DropDatabase { db_handle } => {
                xdr::put_u32(dst, *db_handle);
            }
            Self::Transaction { db_handle, tpb } => {
                xdr::put_u32(dst, *db_handle);
                xdr::put_opaque(dst, tpb);
            }
            Self::Commit { tr_handle }
            | Self::Rollback { tr_handle }
            | Self::CommitRetaining { tr_handle }
            | Self::RollbackRetaining { tr_handle } => {
                xdr::put_u32(dst, *tr_handle);
            }
            Self::Prepare2 { tr_handle, message } => {
                xdr::put_u32(dst, *tr_handle);
                xdr::put_opaque(dst, message);
            }
            Self::InfoDatabase {
                db_handle,
                items,
                buffer_length,
            } => {
                xdr::put_u32(dst, *db_handle);
                xdr::put_i32(dst, 0); // incarnation
                xdr::put_opaque(dst, items);
                xdr::put_u32(dst, *buffer_length);
            }
            Self::ConnectRequest { kind, db_handle } => {
                xdr::put_i32(dst, *kind);
                xdr::put_u32(dst, *db_handle);
                xdr::put_i32(dst, 0); // partner
            }
            Self::FreeStatement {
                stmt_handle,
                option,
            } => {
                xdr::put_u32(dst, *stmt_handle);
                xdr::put_i32(dst, *option);
            }
            Self::Disconnect => {}
        }
    }

    /// Decode one request.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let raw = xdr::get_i32(src)?;
        let op = Operation::from_i32(raw).ok_or(ProtocolError::UnexpectedOperation(raw))?;
        let request = match op {
            Operation::Connect => Self::Connect(ConnectRequest::decode_body(src)?),
            Operation::Attach | Operation::Create => {
                let _object = xdr::get_i32(src)?;
                let database = xdr::get_string(src)?;
                let dpb = xdr::get_opaque(src)?;
                if op == Operation::Attach {
                    Self::Attach { database, dpb }
                } else {
                    Self::Create { database, dpb }
                }
            }
            Operation::Detach => Self::Detach {
                db_handle: xdr::get_u32(src)?,
            },
            Operation::DropDatabase => Self::DropDatabase {
                db_handle: xdr::get_u32(src)?,
            },
            Operation::Transaction => Self::Transaction {
                db_handle: xdr::get_u32(src)?,
                tpb: xdr::get_opaque(src)?,
            },
            Operation::Commit => Self::Commit {
                tr_handle: xdr::get_u32(src)?,
            },
            Operation::Rollback => Self::Rollback {
                tr_handle: xdr::get_u32(src)?,
            },
            Operation::CommitRetaining => Self::CommitRetaining {
                tr_handle: xdr::get_u32(src)?,
            },
            Operation::RollbackRetaining => Self::RollbackRetaining {
                tr_handle: xdr::get_u32(src)?,
            },
            Operation::Prepare2 => Self::Prepare2 {
                tr_handle: xdr::get_u32(src)?,
                message: xdr::get_opaque(src)?,
            },
            Operation::InfoDatabase => {
                let db_handle = xdr::get_u32(src)?;
                let _incarnation = xdr::get_i32(src)?;
                let items = xdr::get_opaque(src)?;
                let buffer_length = xdr::get_u32(src)?;
                Self::InfoDatabase {
                    db_handle,
                    items,
                    buffer_length,
                }
            }
            Operation::ConnectRequest => {
                let kind = xdr::get_i32(src)?;
                let db_handle = xdr::get_u32(src)?;
                let _partner = xdr::get_i32(src)?;
                Self::ConnectRequest { kind, db_handle }
            }
            Operation::FreeStatement => Self::FreeStatement {
                stmt_handle: xdr::get_u32(src)?,
                option: xdr::get_i32(src)?,
            },
            Operation::Disconnect => Self::Disconnect,
            other => return Err(ProtocolError::UnexpectedOperation(other.code())),
        };
        Ok(request)
    }
}

/// Payload of `op_response`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenericResponse {
    /// Object handle created by the request (database, transaction, ...).
    pub handle: u32,
    /// Blob id, unused by the operations in this crate.
    pub blob_id: u64,
    /// Operation-specific data.
    pub data: Bytes,
    /// Status vector.
    pub status: StatusVector,
}

impl GenericResponse {
    /// Successful response with a handle.
    #[must_use]
    pub fn ok(handle: u32) -> Self {
        Self {
            handle,
            blob_id: 0,
            data: Bytes::new(),
            status: StatusVector::success(),
        }
    }

    /// Failed response with a status vector.
    #[must_use]
    pub fn failed(status: StatusVector) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Attach operation data.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }
}

/// A packet sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerPacket {
    /// `op_accept`.
    Accept(AcceptResponse),
    /// `op_reject`.
    Reject,
    /// `op_response`.
    Response(GenericResponse),
    /// `op_dummy` keep-alive.
    Dummy,
}

impl ServerPacket {
    /// Encode the packet, operation code included.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Self::Accept(accept) => {
                xdr::put_i32(dst, Operation::Accept.code());
                accept.encode_body(dst);
            }
            Self::Reject => xdr::put_i32(dst, Operation::Reject.code()),
            Self::Dummy => xdr::put_i32(dst, Operation::Dummy.code()),
            Self::Response(response) => {
                xdr::put_i32(dst, Operation::Response.code());
                xdr::put_u32(dst, response.handle);
                bytes::BufMut::put_u64(dst, response.blob_id);
                xdr::put_opaque(dst, &response.data);
                response.status.encode(dst);
            }
        }
    }

    /// Decode one packet.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let raw = xdr::get_i32(src)?;
        match Operation::from_i32(raw) {
            Some(Operation::Accept) => Ok(Self::Accept(AcceptResponse::decode_body(src)?)),
            Some(Operation::Reject) => Ok(Self::Reject),
            Some(Operation::Dummy) => Ok(Self::Dummy),
            Some(Operation::Response) => {
                let handle = xdr::get_u32(src)?;
                let blob_id = xdr::get_u64(src)?;
                let data = xdr::get_opaque(src)?;
                let status = StatusVector::decode(src)?;
                Ok(Self::Response(GenericResponse {
                    handle,
                    blob_id,
                    data,
                    status,
                }))
            }
            _ => Err(ProtocolError::UnexpectedOperation(raw)),
        }
    }
}
