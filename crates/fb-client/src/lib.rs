//! # fb-client
//!
//! Async Firebird client core: connection lifecycle, session pooling and
//! transaction coordination.
//!
//! ## Features
//!
//! - **Connection state machine**: `Closed -> Connecting -> Open -> Closed`
//!   with state-change and server warning notifications
//! - **Session pooling**: process-wide pools keyed by the canonical
//!   descriptor, bounded by `max pool size` and the connection timeout
//! - **Transactions**: isolation levels mapped to TPB items, one active
//!   transaction per connection, ambient transaction enlistment
//! - **Database lifecycle**: create and drop databases without an open
//!   connection
//!
//! ## Example
//!
//! ```rust,ignore
//! use fb_client::{Connection, ConnectionState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), fb_client::Error> {
//!     let conn = Connection::new(
//!         "data source=localhost;port=3050;database=test.fdb;\
//!          user id=SYSDBA;password=masterkey;pooling=true",
//!     )?;
//!
//!     conn.open().await?;
//!     assert_eq!(conn.state(), ConnectionState::Open);
//!
//!     let mut tx = conn.begin_transaction().await?;
//!     tx.commit().await?;
//!
//!     conn.close().await;
//!     Connection::clear_all_pools().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod database;
pub mod enlistment;
pub mod error;
pub mod events;
pub mod instrumentation;
pub mod pooling;
pub mod session;
pub mod state;
pub mod transaction;

pub use config::{ConnectionOptions, ServerType};
pub use connection::{AccessPolicy, Connection, DatabaseConnection};
pub use database::{create_database, create_database_default, drop_database};
pub use enlistment::{AmbientTransaction, EnlistmentParticipant};
pub use error::{DatabaseError, Error, Result};
pub use events::{ServerWarning, StateChange, SubscriptionId};
pub use fb_protocol::charset::{self, Charset};
pub use fb_protocol::TransactionFlags;
pub use session::Session;
pub use state::ConnectionState;
pub use transaction::{IsolationLevel, Transaction, TransactionOptions, TransactionState};
