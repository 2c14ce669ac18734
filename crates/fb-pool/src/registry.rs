//! Keyed table of pools.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::ConnectionLifecycle;
use crate::pool::Pool;

/// Pools keyed by a caller-chosen string, created on first reference.
///
/// The table only shrinks through [`clear_all`](PoolRegistry::clear_all).
pub struct PoolRegistry<L: ConnectionLifecycle> {
    pools: Mutex<HashMap<String, Pool<L>>>,
}

impl<L: ConnectionLifecycle> PoolRegistry<L> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Return the pool for `key`, creating it with `init` if it does not
    /// exist yet. `init` runs under the registry lock and must not block.
    pub fn get_or_create<F>(&self, key: &str, init: F) -> Result<Pool<L>, PoolError>
    where
        F: FnOnce() -> (L, PoolConfig),
    {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(key) {
            return Ok(pool.clone());
        }
        let (lifecycle, config) = init();
        let pool = Pool::new(lifecycle, config)?;
        pools.insert(key.to_string(), pool.clone());
        tracing::debug!(pools = pools.len(), "registered new pool");
        Ok(pool)
    }

    /// Return the pool for `key` if it exists.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Pool<L>> {
        self.pools.lock().get(key).cloned()
    }

    /// Clear one pool. Returns `false` when no pool exists for `key`.
    pub async fn clear(&self, key: &str) -> bool {
        match self.get(key) {
            Some(pool) => {
                pool.clear().await;
                true
            }
            None => false,
        }
    }

    /// Close and remove every pool.
    ///
    /// Idle connections are disposed now; connections still checked out are
    /// disposed when returned.
    pub async fn clear_all(&self) {
        let pools: Vec<Pool<L>> = self.pools.lock().drain().map(|(_, pool)| pool).collect();
        tracing::debug!(pools = pools.len(), "clearing all pools");
        for pool in pools {
            pool.close().await;
        }
    }

    /// Number of registered pools.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.pools.lock().len()
    }

    /// Registered keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.pools.lock().keys().cloned().collect()
    }
}

impl<L: ConnectionLifecycle> Default for PoolRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::lifecycle::HealthCheckResult;
    use async_trait::async_trait;
    use std::convert::Infallible;

    struct Unit;

    #[async_trait]
    impl ConnectionLifecycle for Unit {
        type Connection = ();
        type Error = Infallible;

        async fn connect(&self) -> Result<(), Infallible> {
            Ok(())
        }

        async fn health_check(&self, _conn: &mut ()) -> HealthCheckResult {
            HealthCheckResult::Healthy
        }

        fn is_reusable(&self, _conn: &()) -> bool {
            true
        }

        async fn dispose(&self, _conn: ()) {}
    }

    fn init() -> (Unit, PoolConfig) {
        (Unit, PoolConfig::new().max_connections(4))
    }

    #[tokio::test]
    async fn test_same_key_same_pool() {
        let registry = PoolRegistry::new();
        let a = registry.get_or_create("db=a", init).unwrap();
        let b = registry.get_or_create("db=a", init).unwrap();
        let c = registry.get_or_create("db=c", init).unwrap();

        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(registry.pool_count(), 2);
    }

    #[tokio::test]
    async fn test_clear_all_empties_registry() {
        let registry = PoolRegistry::new();
        let pool = registry.get_or_create("db=a", init).unwrap();
        let held = pool.get().await.unwrap();
        pool.get().await.unwrap().release().await;

        registry.clear_all().await;
        assert_eq!(registry.pool_count(), 0);
        assert!(pool.is_closed());

        held.release().await;
        assert_eq!(pool.status().total, 0);
    }

    #[tokio::test]
    async fn test_clear_unknown_key() {
        let registry = PoolRegistry::<Unit>::new();
        assert!(!registry.clear("missing").await);
    }

    #[test]
    fn test_invalid_config_not_registered() {
        let registry = PoolRegistry::new();
        let result = registry.get_or_create("db=a", || (Unit, PoolConfig::new().max_connections(0)));
        assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
        assert_eq!(registry.pool_count(), 0);
    }
}
