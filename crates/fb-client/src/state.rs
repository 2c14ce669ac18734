//! Connection lifecycle states.

use std::fmt;

/// Lifecycle state of a [`Connection`](crate::Connection).
///
/// A connection starts `Closed`, passes through `Connecting` while a session
/// is being acquired, and is `Open` while it owns exactly one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No session is held.
    #[default]
    Closed,
    /// A session is being acquired.
    Connecting,
    /// A session is held and usable.
    Open,
}

impl ConnectionState {
    /// Name of the state.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
