//! # fb-pool
//!
//! Session pool with lifecycle management.
//!
//! The pool is generic over a [`ConnectionLifecycle`], which knows how to
//! create, probe and tear down one kind of connection. The pool itself only
//! manages budgets and the idle set.
//!
//! ## Features
//!
//! - Bounded live-connection budget with a timed wait when exhausted
//! - LIFO idle reuse with an idle cap
//! - Broken or stale connections disposed at check-in
//! - Generation-based clearing: idle connections are dropped at once, in-use
//!   connections at their next check-in
//! - Optional liveness probe on checkout and maximum connection lifetime
//! - A keyed registry of pools for process-wide sharing
//!
//! ## Example
//!
//! ```rust,ignore
//! use fb_pool::{Pool, PoolConfig};
//! use std::time::Duration;
//!
//! let config = PoolConfig::new()
//!     .max_connections(20)
//!     .connection_timeout(Duration::from_secs(5));
//!
//! let pool = Pool::new(lifecycle, config)?;
//!
//! let conn = pool.get().await?;
//! // Use connection...
//! conn.release().await;
//!
//! let status = pool.status();
//! println!("Pool utilization: {:.1}%", status.utilization());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pool;
pub mod registry;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::PoolError;

// Pool types
pub use pool::{Pool, PoolMetrics, PoolStatus, Pooled};

// Lifecycle management
pub use lifecycle::{ConnectionLifecycle, ConnectionMetadata, HealthCheckResult};

// Keyed pools
pub use registry::PoolRegistry;
