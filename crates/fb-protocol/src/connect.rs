//! Connection handshake (`op_connect` / `op_accept`).
//!
//! The client opens the socket with `op_connect`, offering a list of protocol
//! versions it can speak together with a user identification block. The
//! server picks one and answers with `op_accept`, or refuses with
//! `op_reject`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::opcode::Operation;
use crate::xdr;

/// Version of the connect packet layout.
pub const CONNECT_VERSION2: i32 = 2;
/// Generic (XDR) client architecture.
pub const ARCH_GENERIC: i32 = 1;
/// Remote procedure call style.
pub const PTYPE_RPC: i32 = 2;
/// Batched sends.
pub const PTYPE_BATCH_SEND: i32 = 3;
/// Lazy sends (deferred responses for some operations).
pub const PTYPE_LAZY_SEND: i32 = 5;
/// Mask extracting the packet type from the accepted type word.
pub const PTYPE_MASK: i32 = 0xFF;
/// Bit set in protocol versions from Firebird onwards.
pub const FB_PROTOCOL_FLAG: u32 = 0x8000;

/// User identification item tags (`CNCT_*`).
pub mod cnct {
    /// OS user name.
    pub const USER: u8 = 1;
    /// Client host name.
    pub const HOST: u8 = 4;
    /// Request user verification (empty value).
    pub const USER_VERIFICATION: u8 = 6;
}

/// Remote protocol versions offered by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    /// InterBase-compatible protocol 10.
    V10,
    /// Firebird protocol 11.
    V11,
    /// Firebird protocol 12.
    V12,
}

impl ProtocolVersion {
    /// Raw wire value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        match self {
            Self::V10 => 10,
            Self::V11 => FB_PROTOCOL_FLAG | 11,
            Self::V12 => FB_PROTOCOL_FLAG | 12,
        }
    }

    /// Parse a raw wire value.
    pub fn from_raw(raw: u32) -> Result<Self, ProtocolError> {
        match raw {
            10 => Ok(Self::V10),
            r if r == FB_PROTOCOL_FLAG | 11 => Ok(Self::V11),
            r if r == FB_PROTOCOL_FLAG | 12 => Ok(Self::V12),
            other => Err(ProtocolError::UnsupportedVersion(other)),
        }
    }
}

/// One protocol entry in the connect packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolOffer {
    /// Protocol version.
    pub version: ProtocolVersion,
    /// Client architecture.
    pub architecture: i32,
    /// Minimum packet type.
    pub min_type: i32,
    /// Maximum packet type.
    pub max_type: i32,
    /// Preference weight; the server picks the highest.
    pub weight: i32,
}

/// Protocols offered by default, lowest preference first.
pub const DEFAULT_OFFERS: [ProtocolOffer; 3] = [
    ProtocolOffer {
        version: ProtocolVersion::V10,
        architecture: ARCH_GENERIC,
        min_type: PTYPE_RPC,
        max_type: PTYPE_BATCH_SEND,
        weight: 2,
    },
    ProtocolOffer {
        version: ProtocolVersion::V11,
        architecture: ARCH_GENERIC,
        min_type: PTYPE_RPC,
        max_type: PTYPE_LAZY_SEND,
        weight: 4,
    },
    ProtocolOffer {
        version: ProtocolVersion::V12,
        architecture: ARCH_GENERIC,
        min_type: PTYPE_RPC,
        max_type: PTYPE_LAZY_SEND,
        weight: 6,
    },
];

/// `op_connect` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Database path the connection is for.
    pub database: String,
    /// Encoded user identification block.
    pub user_identification: Bytes,
    /// Offered protocols.
    pub offers: Vec<ProtocolOffer>,
}

impl ConnectRequest {
    /// Build a connect request with the default protocol offers.
    #[must_use]
    pub fn new(database: impl Into<String>, os_user: &str, host: &str) -> Self {
        Self {
            database: database.into(),
            user_identification: user_identification(os_user, host),
            offers: DEFAULT_OFFERS.to_vec(),
        }
    }

    pub(crate) fn encode_body(&self, dst: &mut BytesMut) {
        xdr::put_i32(dst, Operation::Attach.code());
        xdr::put_i32(dst, CONNECT_VERSION2);
        xdr::put_i32(dst, ARCH_GENERIC);
        xdr::put_str(dst, &self.database);
        xdr::put_i32(dst, self.offers.len() as i32);
        xdr::put_opaque(dst, &self.user_identification);
        for offer in &self.offers {
            xdr::put_u32(dst, offer.version.raw());
            xdr::put_i32(dst, offer.architecture);
            xdr::put_i32(dst, offer.min_type);
            xdr::put_i32(dst, offer.max_type);
            xdr::put_i32(dst, offer.weight);
        }
    }

    pub(crate) fn decode_body(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let _operation = xdr::get_i32(src)?;
        let _connect_version = xdr::get_i32(src)?;
        let _architecture = xdr::get_i32(src)?;
        let database = xdr::get_string(src)?;
        let count = xdr::get_i32(src)?;
        let user_identification = xdr::get_opaque(src)?;
        let count = usize::try_from(count).map_err(|_| ProtocolError::InvalidLength(count))?;
        let mut offers = Vec::with_capacity(count.min(16));
        for _ in 0..count {
            let raw = xdr::get_u32(src)?;
            let architecture = xdr::get_i32(src)?;
            let min_type = xdr::get_i32(src)?;
            let max_type = xdr::get_i32(src)?;
            let weight = xdr::get_i32(src)?;
            // Versions this client does not know are skipped, not fatal.
            if let Ok(version) = ProtocolVersion::from_raw(raw) {
                offers.push(ProtocolOffer {
                    version,
                    architecture,
                    min_type,
                    max_type,
                    weight,
                });
            }
        }
        Ok(Self {
            database,
            user_identification,
            offers,
        })
    }

    /// Offer with the highest weight.
    #[must_use]
    pub fn preferred(&self) -> Option<&ProtocolOffer> {
        self.offers.iter().max_by_key(|o| o.weight)
    }
}

/// Encode the `CNCT_*` user identification block.
#[must_use]
pub fn user_identification(os_user: &str, host: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(os_user.len() + host.len() + 6);
    for (tag, value) in [(cnct::USER, os_user), (cnct::HOST, host)] {
        let value = &value.as_bytes()[..value.len().min(255)];
        buf.put_u8(tag);
        buf.put_u8(value.len() as u8);
        buf.put_slice(value);
    }
    buf.put_u8(cnct::USER_VERIFICATION);
    buf.put_u8(0);
    buf.freeze()
}

/// `op_accept` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptResponse {
    /// Negotiated protocol version.
    pub version: ProtocolVersion,
    /// Negotiated architecture.
    pub architecture: i32,
    /// Packet type word (type in the low byte, flags above).
    pub accept_type: i32,
}

impl AcceptResponse {
    /// Accept the given offer.
    #[must_use]
    pub fn for_offer(offer: &ProtocolOffer) -> Self {
        Self {
            version: offer.version,
            architecture: offer.architecture,
            accept_type: offer.max_type,
        }
    }

    /// Negotiated packet type.
    #[must_use]
    pub const fn packet_type(&self) -> i32 {
        self.accept_type & PTYPE_MASK
    }

    pub(crate) fn encode_body(&self, dst: &mut BytesMut) {
        xdr::put_u32(dst, self.version.raw());
        xdr::put_i32(dst, self.architecture);
        xdr::put_i32(dst, self.accept_type);
    }

    pub(crate) fn decode_body(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let version = ProtocolVersion::from_raw(xdr::get_u32(src)?)?;
        let architecture = xdr::get_i32(src)?;
        let accept_type = xdr::get_i32(src)?;
        Ok(Self {
            version,
            architecture,
            accept_type,
        })
    }
}
