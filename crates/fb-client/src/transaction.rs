//! Transaction support.
//!
//! A [`Transaction`] is started with
//! [`Connection::begin_transaction`](crate::Connection::begin_transaction) and
//! resolved with [`commit`](Transaction::commit) or
//! [`rollback`](Transaction::rollback). Only one transaction can be active on
//! a connection at a time.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Weak};

use fb_protocol::{ParameterBuffer, TransactionFlags, tpb};

use crate::error::{Error, Result};
use crate::pooling::SessionCell;
use crate::session::AbandonFlag;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IsolationLevel {
    /// Read committed, seeing the latest committed record versions.
    ReadUncommitted,
    /// Read committed, waiting on uncommitted record versions.
    #[default]
    ReadCommitted,
    /// Repeatable read.
    RepeatableRead,
    /// Serializable, with table-level consistency.
    Serializable,
    /// Snapshot isolation.
    Snapshot,
}

impl IsolationLevel {
    /// TPB flags for this level.
    #[must_use]
    pub fn tpb_flags(&self) -> TransactionFlags {
        let base = TransactionFlags::WAIT | TransactionFlags::WRITE;
        base | match self {
            Self::Serializable => TransactionFlags::CONSISTENCY,
            Self::RepeatableRead | Self::Snapshot => TransactionFlags::CONCURRENCY,
            Self::ReadCommitted => {
                TransactionFlags::READ_COMMITTED | TransactionFlags::NO_REC_VERSION
            }
            Self::ReadUncommitted => {
                TransactionFlags::READ_COMMITTED | TransactionFlags::REC_VERSION
            }
        }
    }

    /// Descriptor spelling of the level.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "ReadUncommitted",
            Self::ReadCommitted => "ReadCommitted",
            Self::RepeatableRead => "RepeatableRead",
            Self::Serializable => "Serializable",
            Self::Snapshot => "Snapshot",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let key: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "readuncommitted" => Ok(Self::ReadUncommitted),
            "readcommitted" => Ok(Self::ReadCommitted),
            "repeatableread" => Ok(Self::RepeatableRead),
            "serializable" => Ok(Self::Serializable),
            "snapshot" => Ok(Self::Snapshot),
            _ => Err(Error::InvalidConfiguration(format!(
                "unknown isolation level '{s}'"
            ))),
        }
    }
}

/// Explicit transaction behaviour overriding the isolation mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    /// TPB flags; `None` derives them from the isolation level.
    pub flags: Option<TransactionFlags>,
    /// Lock timeout in seconds.
    pub lock_timeout: Option<i32>,
}

impl TransactionOptions {
    /// Options with no overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use exactly these TPB flags.
    #[must_use]
    pub fn flags(mut self, flags: TransactionFlags) -> Self {
        self.flags = Some(flags);
        self
    }

    /// Set the lock timeout in seconds.
    #[must_use]
    pub fn lock_timeout(mut self, seconds: i32) -> Self {
        self.lock_timeout = Some(seconds);
        self
    }

    /// Build the TPB for `isolation`.
    #[must_use]
    pub fn tpb(&self, isolation: IsolationLevel) -> ParameterBuffer {
        let flags = self.flags.unwrap_or_else(|| isolation.tpb_flags());
        tpb::build(flags, self.lock_timeout)
    }
}

/// Resolution state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Started and not yet resolved.
    Active,
    /// Committed.
    Committed,
    /// Rolled back.
    RolledBack,
}

/// A transaction on an open connection.
///
/// Dropping an active transaction marks it abandoned. It is rolled back
/// before the next transaction starts on the connection, or when the
/// connection closes, whichever comes first. With a tokio runtime available
/// the rollback is also started in the background right away.
pub struct Transaction {
    handle: u32,
    isolation: IsolationLevel,
    name: Option<String>,
    state: TransactionState,
    session: Weak<SessionCell>,
    abandon: AbandonFlag,
}

impl Transaction {
    pub(crate) fn new(
        handle: u32,
        isolation: IsolationLevel,
        name: Option<String>,
        session: &Arc<SessionCell>,
        abandon: AbandonFlag,
    ) -> Self {
        Self {
            handle,
            isolation,
            name,
            state: TransactionState::Active,
            session: Arc::downgrade(session),
            abandon,
        }
    }

    /// Server transaction handle.
    #[must_use]
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// Isolation level the transaction was started with.
    #[must_use]
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    /// Caller-supplied name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Commit the transaction.
    pub async fn commit(&mut self) -> Result<()> {
        let handle = self.ensure_active()?;
        let cell = self.session()?;
        let mut guard = cell.lock().await;
        let session = guard.as_mut().ok_or_else(closed)?;
        session.commit(handle).await?;
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Roll the transaction back.
    pub async fn rollback(&mut self) -> Result<()> {
        let handle = self.ensure_active()?;
        let cell = self.session()?;
        let mut guard = cell.lock().await;
        let session = guard.as_mut().ok_or_else(closed)?;
        session.rollback(handle).await?;
        self.state = TransactionState::RolledBack;
        Ok(())
    }

    /// Commit the work done so far and keep the transaction active.
    pub async fn commit_retaining(&mut self) -> Result<()> {
        let handle = self.ensure_active()?;
        let cell = self.session()?;
        let mut guard = cell.lock().await;
        let session = guard.as_mut().ok_or_else(closed)?;
        session.commit_retaining(handle).await
    }

    /// Undo the work done so far and keep the transaction active.
    pub async fn rollback_retaining(&mut self) -> Result<()> {
        let handle = self.ensure_active()?;
        let cell = self.session()?;
        let mut guard = cell.lock().await;
        let session = guard.as_mut().ok_or_else(closed)?;
        session.rollback_retaining(handle).await
    }

    fn ensure_active(&self) -> Result<u32> {
        match self.state {
            TransactionState::Active => Ok(self.handle),
            TransactionState::Committed => Err(Error::TransactionState(
                "transaction has already been committed".into(),
            )),
            TransactionState::RolledBack => Err(Error::TransactionState(
                "transaction has already been rolled back".into(),
            )),
        }
    }

    fn session(&self) -> Result<Arc<SessionCell>> {
        self.session.upgrade().ok_or_else(closed)
    }
}

fn closed() -> Error {
    Error::TransactionState("the connection owning this transaction was closed".into())
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("handle", &self.handle)
            .field("isolation", &self.isolation)
            .field("name", &self.name)
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state != TransactionState::Active {
            return;
        }
        self.abandon.raise();
        let Some(cell) = self.session.upgrade() else {
            return;
        };
        let handle = self.handle;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    let mut guard = cell.lock().await;
                    if let Some(session) = guard.as_mut() {
                        if let Err(e) = session.settle_abandoned().await {
                            tracing::warn!(transaction = handle, error = %e, "rollback of dropped transaction failed");
                        }
                    }
                });
            }
            Err(_) => {
                tracing::debug!(transaction = handle, "no runtime, rollback deferred to close");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use fb_protocol::tpb::tags;

    #[test]
    fn test_isolation_tpb_flags() {
        let rc = IsolationLevel::ReadCommitted.tpb_flags();
        assert!(rc.contains(TransactionFlags::READ_COMMITTED | TransactionFlags::NO_REC_VERSION));
        assert!(rc.contains(TransactionFlags::WAIT | TransactionFlags::WRITE));

        let ru = IsolationLevel::ReadUncommitted.tpb_flags();
        assert!(ru.contains(TransactionFlags::REC_VERSION));

        assert!(IsolationLevel::Serializable
            .tpb_flags()
            .contains(TransactionFlags::CONSISTENCY));
        assert_eq!(
            IsolationLevel::Snapshot.tpb_flags(),
            IsolationLevel::RepeatableRead.tpb_flags()
        );
    }

    #[test]
    fn test_default_tpb_bytes() {
        let tpb = TransactionOptions::new().tpb(IsolationLevel::ReadCommitted);
        assert_eq!(
            tpb.as_bytes(),
            &[
                tpb::VERSION3,
                tags::WAIT,
                tags::WRITE,
                tags::READ_COMMITTED,
                tags::NO_REC_VERSION
            ]
        );
    }

    #[test]
    fn test_explicit_options_override_isolation() {
        let options = TransactionOptions::new()
            .flags(TransactionFlags::CONCURRENCY | TransactionFlags::NO_WAIT | TransactionFlags::READ)
            .lock_timeout(5);
        let tpb = options.tpb(IsolationLevel::Serializable);
        assert_eq!(
            tpb.as_bytes(),
            &[
                tpb::VERSION3,
                tags::CONCURRENCY,
                tags::NOWAIT,
                tags::READ,
                tags::LOCK_TIMEOUT,
                4,
                5,
                0,
                0,
                0
            ]
        );
    }

    #[test]
    fn test_isolation_from_str() {
        assert_eq!(
            "read committed".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::ReadCommitted
        );
        assert_eq!(
            "Serializable".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::Serializable
        );
        assert_eq!(
            "REPEATABLE_READ".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::RepeatableRead
        );
        assert!("chaos".parse::<IsolationLevel>().is_err());
    }

    #[test]
    fn test_display_roundtrips() {
        for level in [
            IsolationLevel::ReadUncommitted,
            IsolationLevel::ReadCommitted,
            IsolationLevel::RepeatableRead,
            IsolationLevel::Serializable,
            IsolationLevel::Snapshot,
        ] {
            assert_eq!(level.to_string().parse::<IsolationLevel>().unwrap(), level);
        }
    }
}
