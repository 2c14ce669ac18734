//! Connection lifecycle hooks.

use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Creates, probes and disposes the connections a pool manages.
#[async_trait]
pub trait ConnectionLifecycle: Send + Sync + 'static {
    /// Connection type managed by the pool.
    type Connection: Send + 'static;
    /// Error produced when connecting.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a new connection.
    async fn connect(&self) -> Result<Self::Connection, Self::Error>;

    /// Probe an idle connection before reuse.
    async fn health_check(&self, conn: &mut Self::Connection) -> HealthCheckResult;

    /// Whether a returned connection may go back to the idle set.
    ///
    /// Broken connections and connections bound elsewhere must answer `false`.
    fn is_reusable(&self, conn: &Self::Connection) -> bool;

    /// Release a connection's resources.
    async fn dispose(&self, conn: Self::Connection);
}

/// Outcome of a health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthCheckResult {
    /// The connection answered.
    Healthy,
    /// The connection failed the probe.
    Unhealthy(String),
}

impl HealthCheckResult {
    /// True for [`HealthCheckResult::Healthy`].
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Bookkeeping the pool keeps for each connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Pool-unique connection id.
    pub id: u64,
    /// When the connection was opened.
    pub created_at: Instant,
    /// When the connection was last handed out.
    pub last_checkout: Option<Instant>,
    /// How many times the connection was handed out.
    pub checkout_count: u64,
    /// Pool generation the connection belongs to.
    pub generation: u64,
}

impl ConnectionMetadata {
    pub(crate) fn new(id: u64, generation: u64) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            last_checkout: None,
            checkout_count: 0,
            generation,
        }
    }

    /// Time since the connection was opened.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn is_expired(&self, max_lifetime: Option<Duration>) -> bool {
        max_lifetime.is_some_and(|max| self.age() >= max)
    }

    pub(crate) fn mark_checkout(&mut self) {
        self.last_checkout = Some(Instant::now());
        self.checkout_count += 1;
    }
}
