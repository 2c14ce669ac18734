//! Tracing instrumentation for connection lifecycle operations.
//!
//! Spans follow the OpenTelemetry database semantic conventions so that a
//! `tracing-opentelemetry` layer can export them unchanged:
//!
//! - `db.system`: "firebird"
//! - `db.name`: database path
//! - `server.address`: server hostname
//! - `server.port`: server port
//!
//! ## Usage
//!
//! ```rust,ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("fb_client=debug")
//!     .init();
//!
//! let conn = Connection::new(descriptor)?;
//! conn.open().await?; // emits a "firebird.open" span
//! ```

use tracing::Span;

use crate::config::ConnectionOptions;
use crate::transaction::IsolationLevel;

/// Database system identifier.
pub const DB_SYSTEM: &str = "firebird";

/// Span names for lifecycle operations.
pub mod span_names {
    /// Opening a connection.
    pub const OPEN: &str = "firebird.open";
    /// Closing a connection.
    pub const CLOSE: &str = "firebird.close";
    /// Switching a connection to another database.
    pub const CHANGE_DATABASE: &str = "firebird.change_database";
    /// Beginning a transaction.
    pub const BEGIN_TRANSACTION: &str = "firebird.begin_transaction";
    /// Enlisting in an ambient transaction.
    pub const ENLIST: &str = "firebird.enlist";
    /// Creating a database.
    pub const CREATE_DATABASE: &str = "firebird.create_database";
    /// Dropping a database.
    pub const DROP_DATABASE: &str = "firebird.drop_database";
}

/// Attribute keys following OpenTelemetry semantic conventions.
pub mod attributes {
    /// Database system type.
    pub const DB_SYSTEM: &str = "db.system";
    /// Database name.
    pub const DB_NAME: &str = "db.name";
    /// Server hostname.
    pub const SERVER_ADDRESS: &str = "server.address";
    /// Server port.
    pub const SERVER_PORT: &str = "server.port";
    /// Transaction isolation level.
    pub const DB_ISOLATION_LEVEL: &str = "db.firebird.isolation_level";
    /// Whether the session came from a pool.
    pub const DB_POOLED: &str = "db.firebird.pooled";
}

/// Span wrapping a lifecycle operation against `options`.
///
/// `name` is one of the [`span_names`] constants.
#[must_use]
pub fn lifecycle_span(name: &'static str, options: &ConnectionOptions) -> Span {
    tracing::info_span!(
        "firebird",
        otel.name = name,
        db.system = DB_SYSTEM,
        db.name = %options.database,
        server.address = %options.data_source,
        server.port = options.port,
        db.firebird.pooled = options.pooling,
    )
}

/// Span for opening a connection.
#[must_use]
pub fn open_span(options: &ConnectionOptions) -> Span {
    lifecycle_span(span_names::OPEN, options)
}

/// Span for closing a connection. Closed connections may have no options.
#[must_use]
pub fn close_span(options: Option<&ConnectionOptions>) -> Span {
    match options {
        Some(options) => lifecycle_span(span_names::CLOSE, options),
        None => tracing::debug_span!("firebird", otel.name = span_names::CLOSE, db.system = DB_SYSTEM),
    }
}

/// Span for beginning a transaction.
#[must_use]
pub fn begin_transaction_span(isolation: IsolationLevel) -> Span {
    tracing::debug_span!(
        "firebird",
        otel.name = span_names::BEGIN_TRANSACTION,
        db.system = DB_SYSTEM,
        db.firebird.isolation_level = %isolation,
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_span_names_are_namespaced() {
        for name in [
            span_names::OPEN,
            span_names::CLOSE,
            span_names::CHANGE_DATABASE,
            span_names::BEGIN_TRANSACTION,
            span_names::ENLIST,
            span_names::CREATE_DATABASE,
            span_names::DROP_DATABASE,
        ] {
            assert!(name.starts_with("firebird."));
        }
    }

    #[test]
    fn test_spans_build_without_subscriber() {
        let options = ConnectionOptions::parse("database=x.fdb;user=u").unwrap();
        let _open = open_span(&options);
        let _close = close_span(None);
        let _begin = begin_transaction_span(IsolationLevel::Snapshot);
    }
}
