//! Ambient transaction enlistment.
//!
//! An external coordinator implements [`AmbientTransaction`]. When a
//! connection enlists, it starts a server transaction with the ambient
//! isolation level and hands the coordinator an [`EnlistmentParticipant`]
//! that drives two-phase completion.
//!
//! A connection closed while its enlistment is pending keeps the session
//! alive; the session is released once the coordinator resolves the
//! transaction.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::pooling::SessionCell;
use crate::transaction::{IsolationLevel, TransactionOptions};

/// An externally coordinated transaction a connection can join.
pub trait AmbientTransaction: Send + Sync {
    /// Isolation level for the server transaction.
    fn isolation_level(&self) -> IsolationLevel;

    /// Register a participant. An error aborts the enlistment.
    fn enlist(&self, participant: Arc<dyn EnlistmentParticipant>) -> Result<()>;
}

/// Two-phase completion callbacks driven by the coordinator.
#[async_trait]
pub trait EnlistmentParticipant: Send + Sync {
    /// Phase one: prepare the server transaction.
    async fn prepare(&self) -> Result<()>;

    /// Phase two: commit.
    async fn commit(&self) -> Result<()>;

    /// Abort.
    async fn rollback(&self) -> Result<()>;
}

#[derive(Debug, Default)]
struct Progress {
    resolved: bool,
    /// The owning connection closed; release the session on resolution.
    detached: bool,
}

/// Server transaction enlisted in an ambient transaction.
pub(crate) struct EnlistedTransaction {
    cell: Arc<SessionCell>,
    handle: u32,
    progress: Mutex<Progress>,
}

impl EnlistedTransaction {
    /// Called by close with the session cell locked. Returns `true` when
    /// the enlistment is still pending and the session must stay alive.
    pub(crate) fn park_if_pending(&self) -> bool {
        let mut progress = self.progress.lock();
        if progress.resolved {
            return false;
        }
        progress.detached = true;
        true
    }

    async fn resolve(&self, commit: bool) -> Result<()> {
        let mut guard = self.cell.lock().await;
        let outcome = match guard.as_mut() {
            Some(session) => {
                let outcome = if commit {
                    session.commit(self.handle).await
                } else {
                    session.rollback(self.handle).await
                };
                session.set_enlisted(false);
                outcome
            }
            None => Err(Error::Enlistment("enlisted session is no longer available".into())),
        };

        let detached = {
            let mut progress = self.progress.lock();
            progress.resolved = true;
            progress.detached
        };
        tracing::debug!(transaction = self.handle, commit, ok = outcome.is_ok(), "enlistment resolved");

        if detached {
            let parked = guard.take();
            drop(guard);
            if let Some(handle) = parked {
                handle.release().await;
            }
        }
        outcome
    }
}

#[async_trait]
impl EnlistmentParticipant for EnlistedTransaction {
    async fn prepare(&self) -> Result<()> {
        let mut guard = self.cell.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| Error::Enlistment("enlisted session is no longer available".into()))?;
        session.prepare(self.handle).await
    }

    async fn commit(&self) -> Result<()> {
        self.resolve(true).await
    }

    async fn rollback(&self) -> Result<()> {
        self.resolve(false).await
    }
}

/// Start a transaction on the session in `cell` and register it with
/// `ambient`. On failure the transaction is rolled back and the session is
/// left unenlisted.
pub(crate) async fn enlist(
    cell: &Arc<SessionCell>,
    ambient: &dyn AmbientTransaction,
) -> Result<Arc<EnlistedTransaction>> {
    let isolation = ambient.isolation_level();
    let handle = {
        let mut guard = cell.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| Error::InvalidOperation("the connection is not open".into()))?;
        if session.is_enlisted() {
            return Err(Error::Enlistment(
                "connection is already enlisted in a transaction".into(),
            ));
        }
        let tpb = TransactionOptions::new().tpb(isolation);
        let handle = session.begin_transaction(&tpb).await?;
        session.set_enlisted(true);
        handle
    };

    let participant = Arc::new(EnlistedTransaction {
        cell: cell.clone(),
        handle,
        progress: Mutex::new(Progress::default()),
    });

    if let Err(e) = ambient.enlist(participant.clone()) {
        let mut guard = cell.lock().await;
        if let Some(session) = guard.as_mut() {
            if let Err(rollback) = session.rollback(handle).await {
                tracing::warn!(error = %rollback, "rollback after failed enlistment failed");
            }
            session.set_enlisted(false);
        }
        return Err(e);
    }

    tracing::debug!(transaction = handle, isolation = %isolation, "enlisted in ambient transaction");
    Ok(participant)
}
