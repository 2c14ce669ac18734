//! Client error types.
//!
//! Every failure that leaves the crate is one of the [`Error`] variants.
//! Server status vectors, transport failures and pool failures are
//! translated here.

use std::time::Duration;

use fb_pool::PoolError;
use fb_protocol::status::codes;
use fb_protocol::{ProtocolError, StatusArg, StatusVector};
use thiserror::Error;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The connection descriptor could not be parsed.
    #[error("invalid connection descriptor: {0}")]
    InvalidDescriptor(String),

    /// A connection setting is missing or invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The operation is not valid in the connection's current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The server or the transport reported an error.
    #[error(transparent)]
    Protocol(#[from] DatabaseError),

    /// No pooled session became available in time.
    #[error("connection pool exhausted: {max} sessions in use after waiting {waited:?}")]
    PoolExhausted {
        /// Configured pool maximum.
        max: u32,
        /// How long the checkout waited.
        waited: Duration,
    },

    /// Establishing the session did not finish in time.
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Transaction used in a state that does not allow the operation.
    #[error("transaction state error: {0}")]
    TransactionState(String),

    /// Enlisting in an ambient transaction failed.
    #[error("enlistment failed: {0}")]
    Enlistment(String),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An error reported by the server, or a transport failure expressed the
/// same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseError {
    /// First error code of the status vector.
    pub code: u32,
    /// Rendered message.
    pub message: String,
    /// SQLSTATE, when the server sent one.
    pub sql_state: Option<String>,
    /// Full status vector.
    pub status: StatusVector,
}

impl DatabaseError {
    /// Translate a status vector.
    #[must_use]
    pub fn from_status(status: StatusVector) -> Self {
        Self {
            code: status.error_code().unwrap_or(0),
            message: status.message(),
            sql_state: status.sql_state().map(str::to_string),
            status,
        }
    }

    /// Transport failure talking to `host`.
    #[must_use]
    pub fn network(host: &str, detail: impl std::fmt::Display) -> Self {
        Self::from_status(StatusVector::from_args(vec![
            StatusArg::Gds(codes::NETWORK_ERROR),
            StatusArg::String(host.to_string()),
            StatusArg::Interpreted(detail.to_string()),
        ]))
    }
}

impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for DatabaseError {}

impl From<StatusVector> for Error {
    fn from(status: StatusVector) -> Self {
        Self::Protocol(DatabaseError::from_status(status))
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnknownCharset(name) => {
                Self::InvalidConfiguration(format!("unknown character set '{name}'"))
            }
            ProtocolError::ParameterTooLong { .. } => Self::InvalidConfiguration(err.to_string()),
            other => Self::Protocol(DatabaseError::from_status(StatusVector::from_args(vec![
                StatusArg::Gds(codes::NET_READ_ERR),
                StatusArg::Interpreted(other.to_string()),
            ]))),
        }
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted { max, waited } => Self::PoolExhausted { max, waited },
            PoolError::Connect(source) => match source.downcast::<Error>() {
                Ok(original) => *original,
                Err(other) => Self::Protocol(DatabaseError::from_status(StatusVector::from_args(
                    vec![
                        StatusArg::Gds(codes::NET_CONNECT_ERR),
                        StatusArg::Interpreted(other.to_string()),
                    ],
                ))),
            },
            PoolError::PoolClosed => Self::InvalidOperation("connection pool is closed".into()),
            PoolError::InvalidConfig(msg) => Self::InvalidConfiguration(msg),
            other => Self::InvalidOperation(other.to_string()),
        }
    }
}

impl Error {
    /// Server error code, when the error carries one.
    #[must_use]
    pub fn code(&self) -> Option<u32> {
        match self {
            Self::Protocol(e) => Some(e.code),
            _ => None,
        }
    }

    /// SQLSTATE, when the server sent one.
    #[must_use]
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Protocol(e) => e.sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check if this error is transient and may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::PoolExhausted { .. } | Self::ConnectTimeout(_) => true,
            Self::Protocol(e) => matches!(
                e.code,
                codes::NETWORK_ERROR
                    | codes::NET_CONNECT_ERR
                    | codes::NET_READ_ERR
                    | codes::NET_WRITE_ERR
                    | codes::DEADLOCK
                    | codes::LOCK_CONFLICT
                    | codes::LOCK_TIMEOUT
                    | codes::UNAVAILABLE
            ),
            _ => false,
        }
    }

    /// Check if this error indicates a lost transport.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self.code(),
            Some(
                codes::NETWORK_ERROR
                    | codes::NET_CONNECT_ERR
                    | codes::NET_READ_ERR
                    | codes::NET_WRITE_ERR
            )
        )
    }
}
