//! Process-wide session pools.
//!
//! Pools are keyed by [`ConnectionOptions::canonical`] and created on first
//! use. The table only shrinks through [`clear_all`].

use std::ops::{Deref, DerefMut};

use async_trait::async_trait;
use fb_pool::{
    ConnectionLifecycle, HealthCheckResult, Pool, PoolRegistry, PoolStatus, Pooled,
};
use once_cell::sync::Lazy;

use crate::config::ConnectionOptions;
use crate::error::{Error, Result};
use crate::session::Session;

static POOLS: Lazy<PoolRegistry<SessionLifecycle>> = Lazy::new(PoolRegistry::new);

/// The session slot of an open connection, shared with its transactions.
pub(crate) type SessionCell = tokio::sync::Mutex<Option<SessionHandle>>;

/// A session owned by a connection, either borrowed from a pool or owned
/// outright.
pub(crate) enum SessionHandle {
    Pooled(Pooled<SessionLifecycle>),
    Owned(Session),
}

impl SessionHandle {
    /// Check a pooled session back in, or dispose an owned one.
    pub(crate) async fn release(self) {
        match self {
            Self::Pooled(pooled) => {
                tracing::debug!(session = pooled.id(), "checking session in");
                pooled.release().await;
            }
            Self::Owned(session) => session.dispose().await,
        }
    }
}

impl Deref for SessionHandle {
    type Target = Session;

    fn deref(&self) -> &Session {
        match self {
            Self::Pooled(pooled) => pooled,
            Self::Owned(session) => session,
        }
    }
}

impl DerefMut for SessionHandle {
    fn deref_mut(&mut self) -> &mut Session {
        match self {
            Self::Pooled(pooled) => pooled,
            Self::Owned(session) => session,
        }
    }
}

/// Opens, probes and disposes sessions for one pool.
#[derive(Debug, Clone)]
pub struct SessionLifecycle {
    options: ConnectionOptions,
}

impl SessionLifecycle {
    /// Lifecycle connecting with `options`.
    #[must_use]
    pub fn new(options: ConnectionOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl ConnectionLifecycle for SessionLifecycle {
    type Connection = Session;
    type Error = Error;

    async fn connect(&self) -> Result<Session> {
        let mut session = Session::connect(&self.options).await?;
        session.set_pooled(true);
        Ok(session)
    }

    async fn health_check(&self, session: &mut Session) -> HealthCheckResult {
        match session.ping().await {
            Ok(()) => HealthCheckResult::Healthy,
            Err(e) => HealthCheckResult::Unhealthy(e.to_string()),
        }
    }

    fn is_reusable(&self, session: &Session) -> bool {
        !session.is_broken() && !session.is_enlisted() && session.active_transaction().is_none()
    }

    async fn dispose(&self, session: Session) {
        session.dispose().await;
    }
}

/// Pool for `options`, created on first reference.
pub(crate) fn get_pool(options: &ConnectionOptions) -> Result<Pool<SessionLifecycle>> {
    let key = options.canonical();
    let pool = POOLS.get_or_create(&key, || {
        tracing::info!(
            host = %options.data_source,
            database = %options.database,
            max = options.max_pool_size,
            "creating session pool"
        );
        (SessionLifecycle::new(options.clone()), options.pool_config())
    })?;
    Ok(pool)
}

/// Borrow a session from the pool for `options`.
pub(crate) async fn checkout(options: &ConnectionOptions) -> Result<SessionHandle> {
    let pool = get_pool(options)?;
    let pooled = pool.get().await?;
    tracing::debug!(session = pooled.id(), reused = pooled.metadata().checkout_count > 1, "checked session out");
    Ok(SessionHandle::Pooled(pooled))
}

/// Number of pools.
#[must_use]
pub fn pool_count() -> usize {
    POOLS.pool_count()
}

/// Status of the pool for `options`, if one exists.
#[must_use]
pub fn pool_status(options: &ConnectionOptions) -> Option<PoolStatus> {
    POOLS.get(&options.canonical()).map(|pool| pool.status())
}

/// Live sessions of the pool for `options`.
#[must_use]
pub fn pooled_session_count(options: &ConnectionOptions) -> usize {
    pool_status(options).map_or(0, |status| status.total as usize)
}

/// Dispose idle sessions of one pool and mark in-use ones for disposal.
pub async fn clear_pool(options: &ConnectionOptions) -> bool {
    POOLS.clear(&options.canonical()).await
}

/// Clear and remove every pool.
pub async fn clear_all() {
    POOLS.clear_all().await;
    tracing::info!("all session pools cleared");
}
