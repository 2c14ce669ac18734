//! Connection pool implementation.
//!
//! The pool state (idle set, in-use count, generation) sits behind one
//! `parking_lot` mutex that is only held while that state is mutated. Socket
//! work done by the lifecycle hooks (connect, probe, dispose) always happens
//! outside the lock.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::{ConnectionLifecycle, ConnectionMetadata, HealthCheckResult};

/// A pool of connections produced by a [`ConnectionLifecycle`].
///
/// Cloning a `Pool` yields another handle to the same pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::new(lifecycle, PoolConfig::new().max_connections(4))?;
///
/// let conn = pool.get().await?;
/// // Use connection...
/// conn.release().await;
/// ```
pub struct Pool<L: ConnectionLifecycle> {
    inner: Arc<PoolInner<L>>,
}

impl<L: ConnectionLifecycle> Clone for Pool<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PoolInner<L: ConnectionLifecycle> {
    config: PoolConfig,
    lifecycle: L,
    state: Mutex<PoolState<L::Connection>>,
    /// Signalled whenever a slot or an idle connection frees up.
    available: Notify,
    warmed: AtomicBool,
    next_connection_id: AtomicU64,
    created_at: Instant,
    metrics: Mutex<PoolMetricsInner>,
}

struct PoolState<C> {
    idle: VecDeque<IdleConnection<C>>,
    /// Connections handed out, plus connections being opened.
    in_use: u32,
    generation: u64,
    closed: bool,
}

impl<C> PoolState<C> {
    fn total(&self) -> u32 {
        self.idle.len() as u32 + self.in_use
    }
}

struct IdleConnection<C> {
    conn: C,
    metadata: ConnectionMetadata,
}

enum Checkout<C> {
    Closed,
    Reuse(IdleConnection<C>),
    Create { generation: u64 },
    Wait,
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    connections_created: u64,
    connections_closed: u64,
    checkouts_successful: u64,
    checkouts_failed: u64,
    health_checks_performed: u64,
    health_checks_failed: u64,
}

impl<L: ConnectionLifecycle> Pool<L> {
    /// Create a pool. No connection is opened until the first checkout.
    pub fn new(lifecycle: L, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        tracing::info!(
            min = config.min_connections,
            max = config.max_connections,
            "connection pool created"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                lifecycle,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    in_use: 0,
                    generation: 0,
                    closed: false,
                }),
                available: Notify::new(),
                warmed: AtomicBool::new(false),
                next_connection_id: AtomicU64::new(1),
                created_at: Instant::now(),
                metrics: Mutex::new(PoolMetricsInner::default()),
            }),
        })
    }

    /// Get a connection from the pool.
    ///
    /// Reuses the most recently returned idle connection when there is one,
    /// otherwise opens a new connection if the live budget allows. When the
    /// budget is exhausted this waits up to the configured connection timeout
    /// for a release, then fails with [`PoolError::Exhausted`]. A zero
    /// timeout waits without a deadline.
    pub async fn get(&self) -> Result<Pooled<L>, PoolError> {
        let started = tokio::time::Instant::now();
        let timeout = self.inner.config.connection_timeout;
        let deadline = (!timeout.is_zero()).then(|| started + timeout);

        if !self.inner.warmed.swap(true, Ordering::AcqRel) {
            self.warm_up().await;
        }

        loop {
            let notified = self.inner.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let step = {
                let mut state = self.inner.state.lock();
                if state.closed {
                    Checkout::Closed
                } else if let Some(idle) = state.idle.pop_back() {
                    state.in_use += 1;
                    Checkout::Reuse(idle)
                } else if state.total() < self.inner.config.max_connections {
                    state.in_use += 1;
                    Checkout::Create {
                        generation: state.generation,
                    }
                } else {
                    Checkout::Wait
                }
            };

            match step {
                Checkout::Closed => {
                    self.inner.record_checkout(false);
                    return Err(PoolError::PoolClosed);
                }
                Checkout::Reuse(idle) => {
                    let slot = Slot::new(Arc::clone(&self.inner), true);
                    if let Some(pooled) = self.inner.revalidate(idle, slot).await {
                        self.inner.record_checkout(true);
                        return Ok(pooled);
                    }
                }
                Checkout::Create { generation } => {
                    let slot = Slot::new(Arc::clone(&self.inner), false);
                    let result = self.inner.open_new(slot, generation).await;
                    self.inner.record_checkout(result.is_ok());
                    return result;
                }
                Checkout::Wait => {
                    tracing::trace!("pool at capacity, waiting for a release");
                    let Some(deadline) = deadline else {
                        notified.await;
                        continue;
                    };
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        self.inner.record_checkout(false);
                        return Err(PoolError::Exhausted {
                            max: self.inner.config.max_connections,
                            waited: started.elapsed(),
                        });
                    }
                }
            }
        }
    }

    async fn warm_up(&self) {
        let target = self.inner.config.min_connections;
        for _ in 0..target {
            let generation = {
                let mut state = self.inner.state.lock();
                if state.closed || state.total() >= target {
                    return;
                }
                state.in_use += 1;
                state.generation
            };
            let mut slot = Slot::new(Arc::clone(&self.inner), false);
            match self.inner.lifecycle.connect().await {
                Ok(conn) => {
                    slot.connected = true;
                    self.inner.metrics.lock().connections_created += 1;
                    let metadata = ConnectionMetadata::new(self.inner.next_id(), generation);
                    self.inner.checkin(conn, metadata, slot).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "pool warm-up connect failed");
                    return;
                }
            }
        }
    }

    /// Dispose every idle connection and mark in-use connections for
    /// disposal when they are returned.
    pub async fn clear(&self) {
        let drained: Vec<_> = {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            state.idle.drain(..).collect()
        };
        self.inner.available.notify_waiters();

        tracing::debug!(disposed = drained.len(), "clearing connection pool");
        for idle in drained {
            self.inner.lifecycle.dispose(idle.conn).await;
            self.inner.metrics.lock().connections_closed += 1;
        }
    }

    /// Close the pool. Pending and future checkouts fail with
    /// [`PoolError::PoolClosed`]; returned connections are disposed.
    pub async fn close(&self) {
        self.inner.state.lock().closed = true;
        self.clear().await;
        tracing::info!("connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            available: state.idle.len() as u32,
            in_use: state.in_use,
            total: state.total(),
            max: self.inner.config.max_connections,
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            health_checks_performed: inner.health_checks_performed,
            health_checks_failed: inner.health_checks_failed,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// True when both handles refer to the same pool.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<L: ConnectionLifecycle> std::fmt::Debug for Pool<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish()
    }
}

impl<L: ConnectionLifecycle> PoolInner<L> {
    fn next_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    fn record_checkout(&self, success: bool) {
        let mut metrics = self.metrics.lock();
        if success {
            metrics.checkouts_successful += 1;
        } else {
            metrics.checkouts_failed += 1;
        }
    }

    async fn open_new(
        self: &Arc<Self>,
        mut slot: Slot<L>,
        generation: u64,
    ) -> Result<Pooled<L>, PoolError> {
        let conn = self
            .lifecycle
            .connect()
            .await
            .map_err(|e| PoolError::Connect(Box::new(e)))?;

        slot.connected = true;
        self.metrics.lock().connections_created += 1;

        let mut metadata = ConnectionMetadata::new(self.next_id(), generation);
        metadata.mark_checkout();
        tracing::debug!(connection_id = metadata.id, "opened pooled connection");

        Ok(Pooled {
            conn,
            metadata,
            slot,
        })
    }

    /// Check an idle connection before handing it out. Returns `None` when
    /// the connection was disposed instead.
    async fn revalidate(
        &self,
        idle: IdleConnection<L::Connection>,
        slot: Slot<L>,
    ) -> Option<Pooled<L>> {
        let IdleConnection {
            mut conn,
            mut metadata,
        } = idle;

        if metadata.is_expired(self.config.max_lifetime) {
            tracing::debug!(connection_id = metadata.id, "idle connection exceeded its lifetime");
            self.lifecycle.dispose(conn).await;
            return None;
        }

        if self.config.test_on_checkout {
            let result = self.lifecycle.health_check(&mut conn).await;
            {
                let mut metrics = self.metrics.lock();
                metrics.health_checks_performed += 1;
                if !result.is_healthy() {
                    metrics.health_checks_failed += 1;
                }
            }
            if let HealthCheckResult::Unhealthy(reason) = result {
                tracing::debug!(connection_id = metadata.id, %reason, "idle connection failed probe");
                self.lifecycle.dispose(conn).await;
                return None;
            }
        }

        metadata.mark_checkout();
        tracing::trace!(connection_id = metadata.id, "reusing idle connection");
        Some(Pooled {
            conn,
            metadata,
            slot,
        })
    }

    async fn checkin(&self, conn: L::Connection, metadata: ConnectionMetadata, slot: Slot<L>) {
        let reusable = self.lifecycle.is_reusable(&conn);
        let expired = metadata.is_expired(self.config.max_lifetime);
        let connection_id = metadata.id;

        let rejected = {
            let mut state = self.state.lock();
            let reason = if !reusable {
                Some("not reusable")
            } else if state.closed {
                Some("pool closed")
            } else if metadata.generation != state.generation {
                Some("pool cleared")
            } else if expired {
                Some("lifetime exceeded")
            } else if state.idle.len() as u32 >= self.config.idle_cap() {
                Some("idle cap reached")
            } else {
                None
            };
            match reason {
                None => {
                    state.in_use = state.in_use.saturating_sub(1);
                    state.idle.push_back(IdleConnection { conn, metadata });
                    None
                }
                Some(reason) => Some((conn, reason)),
            }
        };

        match rejected {
            None => {
                slot.disarm();
                self.available.notify_one();
                tracing::trace!(connection_id, "connection returned to pool");
            }
            Some((conn, reason)) => {
                tracing::debug!(connection_id, reason, "disposing connection at check-in");
                self.lifecycle.dispose(conn).await;
                drop(slot);
            }
        }
    }

    fn release_slot(&self, connected: bool) {
        {
            let mut state = self.state.lock();
            state.in_use = state.in_use.saturating_sub(1);
        }
        if connected {
            self.metrics.lock().connections_closed += 1;
        }
        self.available.notify_one();
    }
}

/// One unit of the live budget. Dropping an armed slot gives it back.
struct Slot<L: ConnectionLifecycle> {
    pool: Arc<PoolInner<L>>,
    connected: bool,
    armed: bool,
}

impl<L: ConnectionLifecycle> Slot<L> {
    fn new(pool: Arc<PoolInner<L>>, connected: bool) -> Self {
        Self {
            pool,
            connected,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<L: ConnectionLifecycle> Drop for Slot<L> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.release_slot(self.connected);
        }
    }
}

/// A connection checked out of a [`Pool`].
///
/// Return it with [`release`](Pooled::release). Dropping it without
/// releasing closes the connection and frees its slot in the pool.
pub struct Pooled<L: ConnectionLifecycle> {
    conn: L::Connection,
    metadata: ConnectionMetadata,
    slot: Slot<L>,
}

impl<L: ConnectionLifecycle> Pooled<L> {
    /// Get the connection metadata.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }

    /// Return the connection to its pool.
    ///
    /// Broken, stale or surplus connections are disposed instead of being
    /// kept idle.
    pub async fn release(self) {
        let Self {
            conn,
            metadata,
            slot,
        } = self;
        let pool = Arc::clone(&slot.pool);
        pool.checkin(conn, metadata, slot).await;
    }
}

impl<L: ConnectionLifecycle> Deref for Pooled<L> {
    type Target = L::Connection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<L: ConnectionLifecycle> DerefMut for Pooled<L> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl<L: ConnectionLifecycle> std::fmt::Debug for Pooled<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pooled")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently in use.
    pub in_use: u32,
    /// Total number of live connections.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections created since pool start.
    pub connections_created: u64,
    /// Total connections closed since pool start.
    pub connections_closed: u64,
    /// Successful connection checkouts.
    pub checkouts_successful: u64,
    /// Failed connection checkouts (timeouts, pool closed, connect errors).
    pub checkouts_failed: u64,
    /// Health checks performed.
    pub health_checks_performed: u64,
    /// Health checks that failed.
    pub health_checks_failed: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }

    /// Calculate health check success rate (0.0 to 1.0).
    #[must_use]
    pub fn health_check_success_rate(&self) -> f64 {
        if self.health_checks_performed == 0 {
            return 1.0;
        }
        let successful = self.health_checks_performed - self.health_checks_failed;
        successful as f64 / self.health_checks_performed as f64
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct TestConn {
        id: u64,
        broken: bool,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("connection refused")]
    struct Refused;

    #[derive(Default)]
    struct TestLifecycle {
        next: AtomicU64,
        refuse: AtomicBool,
        unhealthy: AtomicBool,
        disposed: Arc<AtomicU64>,
    }

    #[async_trait]
    impl ConnectionLifecycle for TestLifecycle {
        type Connection = TestConn;
        type Error = Refused;

        async fn connect(&self) -> Result<TestConn, Refused> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(Refused);
            }
            Ok(TestConn {
                id: self.next.fetch_add(1, Ordering::SeqCst) + 1,
                broken: false,
            })
        }

        async fn health_check(&self, _conn: &mut TestConn) -> HealthCheckResult {
            if self.unhealthy.load(Ordering::SeqCst) {
                HealthCheckResult::Unhealthy("probe failed".into())
            } else {
                HealthCheckResult::Healthy
            }
        }

        fn is_reusable(&self, conn: &TestConn) -> bool {
            !conn.broken
        }

        async fn dispose(&self, _conn: TestConn) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool(config: PoolConfig) -> (Pool<TestLifecycle>, Arc<AtomicU64>) {
        let lifecycle = TestLifecycle::default();
        let disposed = Arc::clone(&lifecycle.disposed);
        (Pool::new(lifecycle, config).unwrap(), disposed)
    }

    #[tokio::test]
    async fn test_released_connection_is_reused() {
        let (pool, _) = pool(PoolConfig::new().max_connections(2));

        let conn = pool.get().await.unwrap();
        let first = conn.id;
        conn.release().await;

        let again = pool.get().await.unwrap();
        assert_eq!(again.id, first);
        assert_eq!(again.metadata().checkout_count, 2);
        assert_eq!(pool.status().total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_timeout() {
        let (pool, _) = pool(
            PoolConfig::new()
                .max_connections(1)
                .connection_timeout(Duration::from_millis(200)),
        );

        let _held = pool.get().await.unwrap();
        let err = pool.get().await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { max: 1, .. }));
        assert_eq!(pool.metrics().checkouts_failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_receives_released_connection() {
        let (pool, _) = pool(
            PoolConfig::new()
                .max_connections(1)
                .connection_timeout(Duration::from_secs(5)),
        );

        let held = pool.get().await.unwrap();
        let held_id = held.id;
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get().await.map(|c| c.id) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        held.release().await;

        assert_eq!(waiter.await.unwrap().unwrap(), held_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_waits_for_release() {
        let (pool, _) = pool(
            PoolConfig::new()
                .max_connections(1)
                .connection_timeout(Duration::ZERO),
        );

        let held = pool.get().await.unwrap();
        let held_id = held.id;
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get().await.map(|c| c.id) })
        };
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(!waiter.is_finished());

        held.release().await;
        assert_eq!(waiter.await.unwrap().unwrap(), held_id);
        assert_eq!(pool.metrics().checkouts_failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_then_close_fails_waiting_checkout() {
        let (pool, disposed) = pool(
            PoolConfig::new()
                .max_connections(1)
                .connection_timeout(Duration::from_secs(30)),
        );

        let held = pool.get().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get().await.map(|c| c.id) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        pool.clear().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        let started = tokio::time::Instant::now();
        pool.close().await;
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(PoolError::PoolClosed)));
        assert!(started.elapsed() < Duration::from_secs(30));

        held.release().await;
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.status().total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_lets_waiter_take_freed_slot() {
        let (pool, _) = pool(
            PoolConfig::new()
                .max_connections(1)
                .connection_timeout(Duration::from_secs(30)),
        );

        let held = pool.get().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get().await.map(|c| c.id) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        pool.clear().await;
        held.release().await;

        // The cleared connection is disposed, so the waiter opens a new one.
        assert_eq!(waiter.await.unwrap().unwrap(), 2);
        assert_eq!(pool.status().total, 1);
    }

    #[tokio::test]
    async fn test_broken_connection_disposed_at_checkin() {
        let (pool, disposed) = pool(PoolConfig::new());

        let mut conn = pool.get().await.unwrap();
        conn.broken = true;
        conn.release().await;

        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.status().total, 0);
        assert_eq!(pool.get().await.unwrap().id, 2);
    }

    #[tokio::test]
    async fn test_idle_cap_disposes_surplus() {
        let (pool, disposed) = pool(PoolConfig::new().max_connections(3).max_idle(1));

        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        a.release().await;
        b.release().await;

        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.status().available, 1);
    }

    #[tokio::test]
    async fn test_clear_disposes_idle_and_marks_in_use() {
        let (pool, disposed) = pool(PoolConfig::new());

        let in_use = pool.get().await.unwrap();
        let idle = pool.get().await.unwrap();
        idle.release().await;

        pool.clear().await;
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.status().total, 1);

        in_use.release().await;
        assert_eq!(disposed.load(Ordering::SeqCst), 2);
        assert_eq!(pool.status().total, 0);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_checkout() {
        let (pool, _) = pool(PoolConfig::new());
        pool.close().await;
        assert!(pool.is_closed());
        assert!(matches!(pool.get().await, Err(PoolError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_connect_failure_releases_budget() {
        let lifecycle = TestLifecycle::default();
        lifecycle.refuse.store(true, Ordering::SeqCst);
        let pool = Pool::new(lifecycle, PoolConfig::new().max_connections(1)).unwrap();

        assert!(matches!(pool.get().await, Err(PoolError::Connect(_))));
        assert_eq!(pool.status().total, 0);
    }

    #[tokio::test]
    async fn test_dropped_connection_frees_slot() {
        let (pool, _) = pool(PoolConfig::new().max_connections(1));
        drop(pool.get().await.unwrap());
        assert_eq!(pool.status().total, 0);
        assert_eq!(pool.metrics().connections_closed, 1);
        assert!(pool.get().await.is_ok());
    }

    #[tokio::test]
    async fn test_warm_up_opens_min_connections() {
        let (pool, _) = pool(PoolConfig::new().min_connections(3).max_connections(5));
        let _conn = pool.get().await.unwrap();

        let status = pool.status();
        assert_eq!(status.total, 3);
        assert_eq!(status.available, 2);
        assert_eq!(pool.metrics().connections_created, 3);
    }

    #[tokio::test]
    async fn test_unhealthy_idle_connection_replaced() {
        let lifecycle = TestLifecycle::default();
        let disposed = Arc::clone(&lifecycle.disposed);
        let pool = Pool::new(lifecycle, PoolConfig::new().test_on_checkout(true)).unwrap();

        pool.get().await.unwrap().release().await;
        pool.inner.lifecycle.unhealthy.store(true, Ordering::SeqCst);

        let conn = pool.get().await.unwrap();
        assert_eq!(conn.id, 2);
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.metrics().health_checks_failed, 1);
    }

    #[test]
    fn test_pool_status_utilization() {
        let status = PoolStatus {
            available: 5,
            in_use: 5,
            total: 10,
            max: 20,
        };
        assert!((status.utilization() - 25.0).abs() < f64::EPSILON);
        assert!(!status.is_at_capacity());
    }

    #[test]
    fn test_pool_metrics_success_rates() {
        let metrics = PoolMetrics {
            connections_created: 10,
            connections_closed: 2,
            checkouts_successful: 90,
            checkouts_failed: 10,
            health_checks_performed: 100,
            health_checks_failed: 5,
            uptime: Duration::from_secs(3600),
        };

        assert!((metrics.checkout_success_rate() - 0.9).abs() < f64::EPSILON);
        assert!((metrics.health_check_success_rate() - 0.95).abs() < f64::EPSILON);
    }
}
