//! Remote protocol operation codes.

/// Operation code at the head of every request and response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Operation {
    /// Initial connection request.
    Connect = 1,
    /// Server accepts the connection.
    Accept = 3,
    /// Server rejects the connection.
    Reject = 4,
    /// Orderly socket shutdown.
    Disconnect = 6,
    /// Generic response (handle, blob id, data, status vector).
    Response = 9,
    /// Attach to an existing database.
    Attach = 19,
    /// Create a new database.
    Create = 20,
    /// Detach from the database.
    Detach = 21,
    /// Start a transaction.
    Transaction = 29,
    /// Commit a transaction.
    Commit = 30,
    /// Roll back a transaction.
    Rollback = 31,
    /// Request database information items.
    InfoDatabase = 40,
    /// Commit but keep the transaction context.
    CommitRetaining = 50,
    /// First phase of a two-phase commit.
    Prepare2 = 51,
    /// Request the auxiliary (event) connection.
    ConnectRequest = 53,
    /// Release a prepared statement.
    FreeStatement = 67,
    /// Keep-alive sent by the server; carries no payload.
    Dummy = 71,
    /// Drop the attached database.
    DropDatabase = 81,
    /// Roll back but keep the transaction context.
    RollbackRetaining = 86,
    /// Conditional accept (protocol 13+ authentication).
    CondAccept = 98,
}

impl Operation {
    /// Create from the raw wire value.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Connect),
            3 => Some(Self::Accept),
            4 => Some(Self::Reject),
            6 => Some(Self::Disconnect),
            9 => Some(Self::Response),
            19 => Some(Self::Attach),
            20 => Some(Self::Create),
            21 => Some(Self::Detach),
            29 => Some(Self::Transaction),
            30 => Some(Self::Commit),
            31 => Some(Self::Rollback),
            40 => Some(Self::InfoDatabase),
            50 => Some(Self::CommitRetaining),
            51 => Some(Self::Prepare2),
            53 => Some(Self::ConnectRequest),
            67 => Some(Self::FreeStatement),
            71 => Some(Self::Dummy),
            81 => Some(Self::DropDatabase),
            86 => Some(Self::RollbackRetaining),
            98 => Some(Self::CondAccept),
            _ => None,
        }
    }

    /// Raw wire value.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_i32() {
        assert_eq!(Operation::from_i32(9), Some(Operation::Response));
        assert_eq!(Operation::from_i32(71), Some(Operation::Dummy));
        assert_eq!(Operation::from_i32(2), None);
        assert_eq!(Operation::DropDatabase.code(), 81);
    }
}
