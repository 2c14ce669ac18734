//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Configuration for a connection pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connections opened on first checkout.
    pub min_connections: u32,
    /// Maximum number of live connections (idle plus in use).
    pub max_connections: u32,
    /// Maximum number of idle connections retained; `None` means
    /// `max_connections`.
    pub max_idle: Option<u32>,
    /// How long a checkout waits for a free slot; zero waits until a
    /// connection is released or the pool is closed.
    pub connection_timeout: Duration,
    /// Connections older than this are not reused; `None` means unlimited.
    pub max_lifetime: Option<Duration>,
    /// Probe idle connections before handing them out.
    pub test_on_checkout: bool,
}

impl PoolConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum number of connections.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.min_connections = count;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.max_connections = count;
        self
    }

    /// Set the idle cap.
    #[must_use]
    pub fn max_idle(mut self, count: u32) -> Self {
        self.max_idle = Some(count);
        self
    }

    /// Set the checkout timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the maximum connection lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    /// Enable or disable the checkout probe.
    #[must_use]
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }

    /// Effective idle cap.
    #[must_use]
    pub fn idle_cap(&self) -> u32 {
        self.max_idle.unwrap_or(self.max_connections)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_connections == 0 {
            return Err(PoolError::InvalidConfig(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(PoolError::InvalidConfig(format!(
                "min_connections ({}) cannot exceed max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.idle_cap() > self.max_connections {
            return Err(PoolError::InvalidConfig(format!(
                "max_idle ({}) cannot exceed max_connections ({})",
                self.idle_cap(),
                self.max_connections
            )));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 0,
            max_connections: 100,
            max_idle: None,
            connection_timeout: Duration::from_secs(15),
            max_lifetime: None,
            test_on_checkout: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.idle_cap(), 100);
    }

    #[test]
    fn test_invalid_bounds() {
        assert!(PoolConfig::new().max_connections(0).validate().is_err());
        assert!(
            PoolConfig::new()
                .min_connections(5)
                .max_connections(2)
                .validate()
                .is_err()
        );
        assert!(
            PoolConfig::new()
                .max_connections(2)
                .max_idle(3)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_idle_cap_follows_max() {
        let config = PoolConfig::new().max_connections(7);
        assert_eq!(config.idle_cap(), 7);
        assert_eq!(config.max_idle(2).idle_cap(), 2);
    }
}
