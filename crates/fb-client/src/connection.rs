//! The public connection state machine.
//!
//! A [`Connection`] moves through `Closed -> Connecting -> Open -> Closed`.
//! It owns at most one session while open. Open, close and change-database
//! calls on the same connection are serialized; connections sharing a pool
//! only contend on the pool's own lock.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::Instrument;

use crate::config::ConnectionOptions;
use crate::enlistment::{self, AmbientTransaction, EnlistedTransaction};
use crate::error::{Error, Result};
use crate::events::{EventHub, ServerWarning, StateChange, SubscriptionId};
use crate::instrumentation;
use crate::pooling::{self, SessionCell, SessionHandle};
use crate::session::Session;
use crate::state::ConnectionState;
use crate::transaction::{IsolationLevel, Transaction, TransactionOptions};

/// Access check run before a connection opens.
pub trait AccessPolicy: Send + Sync {
    /// Fail to forbid opening a connection with `options`.
    fn demand(&self, options: &ConnectionOptions) -> Result<()>;
}

/// Capabilities shared by database connections.
#[async_trait]
pub trait DatabaseConnection: Send + Sync {
    /// Open the connection.
    async fn open(&self) -> Result<()>;

    /// Close the connection. Never fails.
    async fn close(&self);

    /// Begin a transaction with the default isolation level.
    async fn begin_transaction(&self) -> Result<Transaction>;

    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;
}

#[derive(Default)]
struct Shared {
    state: ConnectionState,
    connection_string: String,
    options: Option<ConnectionOptions>,
    session: Option<Arc<SessionCell>>,
    enlistment: Option<Arc<EnlistedTransaction>>,
    ambient: Option<Arc<dyn AmbientTransaction>>,
    access_policy: Option<Arc<dyn AccessPolicy>>,
}

/// A logical connection to a Firebird database.
///
/// # Example
///
/// ```rust,ignore
/// use fb_client::Connection;
///
/// let conn = Connection::new(
///     "data source=localhost;database=employee;user id=SYSDBA;password=masterkey",
/// )?;
/// conn.open().await?;
/// let mut tx = conn.begin_transaction().await?;
/// tx.commit().await?;
/// conn.close().await;
/// ```
pub struct Connection {
    /// Serializes state transitions.
    transition: tokio::sync::Mutex<()>,
    shared: Mutex<Shared>,
    events: Arc<EventHub>,
}

impl Connection {
    /// Create a closed connection for `descriptor`.
    ///
    /// An empty descriptor is accepted; [`open`](Self::open) then fails
    /// until one is set.
    pub fn new(descriptor: &str) -> Result<Self> {
        let conn = Self {
            transition: tokio::sync::Mutex::new(()),
            shared: Mutex::new(Shared::default()),
            events: Arc::new(EventHub::default()),
        };
        {
            let mut shared = conn.shared.lock();
            shared.options = parse_descriptor(descriptor)?;
            shared.connection_string = descriptor.to_string();
        }
        Ok(conn)
    }

    /// Create a closed connection from parsed options.
    pub fn with_options(options: ConnectionOptions) -> Result<Self> {
        options.validate()?;
        let conn = Self::new("")?;
        {
            let mut shared = conn.shared.lock();
            shared.connection_string = options.canonical();
            shared.options = Some(options);
        }
        Ok(conn)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// The connection descriptor.
    #[must_use]
    pub fn connection_string(&self) -> String {
        self.shared.lock().connection_string.clone()
    }

    /// Replace the connection descriptor. Only allowed while closed.
    pub async fn set_connection_string(&self, descriptor: &str) -> Result<()> {
        let _guard = self.transition.lock().await;
        let options = parse_descriptor(descriptor)?;
        let mut shared = self.shared.lock();
        if shared.state != ConnectionState::Closed {
            return Err(Error::InvalidOperation(
                "the connection string can only be changed while the connection is closed".into(),
            ));
        }
        shared.options = options;
        shared.connection_string = descriptor.to_string();
        Ok(())
    }

    /// Parsed options, when a descriptor is set.
    #[must_use]
    pub fn options(&self) -> Option<ConnectionOptions> {
        self.shared.lock().options.clone()
    }

    /// Database path.
    #[must_use]
    pub fn database(&self) -> String {
        self.read_option(|o| o.database.clone())
    }

    /// Server host.
    #[must_use]
    pub fn data_source(&self) -> String {
        self.read_option(|o| o.data_source.clone())
    }

    /// Connection timeout.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        self.read_option(|o| o.connection_timeout)
    }

    /// Network packet size.
    #[must_use]
    pub fn packet_size(&self) -> u32 {
        self.read_option(|o| o.packet_size)
    }

    fn read_option<T: Default>(&self, f: impl FnOnce(&ConnectionOptions) -> T) -> T {
        self.shared.lock().options.as_ref().map(f).unwrap_or_default()
    }

    /// Install the access check run on every open.
    pub fn set_access_policy(&self, policy: Arc<dyn AccessPolicy>) {
        self.shared.lock().access_policy = Some(policy);
    }

    /// Supply the ambient transaction consulted by [`open`](Self::open)
    /// when the descriptor sets `enlist=true`. `None` clears it.
    pub fn set_ambient_transaction(&self, ambient: Option<Arc<dyn AmbientTransaction>>) {
        self.shared.lock().ambient = ambient;
    }

    /// Register a state-change callback.
    pub fn subscribe_state_changes(
        &self,
        callback: impl Fn(StateChange) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.events.on_state_change(callback)
    }

    /// Register a server warning callback.
    pub fn subscribe_warnings(
        &self,
        callback: impl Fn(&ServerWarning) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.events.on_warning(callback)
    }

    /// Remove a callback. Returns `false` for an unknown id.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Open the connection.
    ///
    /// Fails with [`Error::InvalidOperation`] when the connection is not
    /// closed or has no descriptor. Any other failure leaves the connection
    /// closed with no session held.
    pub async fn open(&self) -> Result<()> {
        let _guard = self.transition.lock().await;
        self.open_locked().await
    }

    async fn open_locked(&self) -> Result<()> {
        let (options, ambient, policy) = {
            let shared = self.shared.lock();
            let options = match &shared.options {
                Some(options) if !shared.connection_string.is_empty() => options.clone(),
                _ => {
                    return Err(Error::InvalidOperation(
                        "the connection string is not initialized".into(),
                    ));
                }
            };
            if shared.state != ConnectionState::Closed {
                return Err(Error::InvalidOperation("the connection is already open".into()));
            }
            let ambient = if options.enlist {
                Some(shared.ambient.clone().ok_or_else(|| {
                    Error::InvalidOperation(
                        "there is no active ambient transaction to enlist in".into(),
                    )
                })?)
            } else {
                None
            };
            (options, ambient, shared.access_policy.clone())
        };

        let span = instrumentation::open_span(&options);
        async {
            self.transition_to(ConnectionState::Connecting);
            match self.establish(&options, ambient, policy).await {
                Ok((cell, enlistment)) => {
                    {
                        let mut shared = self.shared.lock();
                        shared.session = Some(cell);
                        shared.enlistment = enlistment;
                    }
                    self.transition_to(ConnectionState::Open);
                    tracing::info!("connection opened");
                    Ok(())
                }
                Err(e) => {
                    self.transition_to(ConnectionState::Closed);
                    tracing::debug!(error = %e, "open failed");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn establish(
        &self,
        options: &ConnectionOptions,
        ambient: Option<Arc<dyn AmbientTransaction>>,
        policy: Option<Arc<dyn AccessPolicy>>,
    ) -> Result<(Arc<SessionCell>, Option<Arc<EnlistedTransaction>>)> {
        if let Some(policy) = policy {
            policy.demand(options)?;
        }

        let handle = if options.pooling {
            pooling::checkout(options).await?
        } else {
            SessionHandle::Owned(Session::connect(options).await?)
        };
        let cell = Arc::new(SessionCell::new(Some(handle)));

        let enlistment = match ambient {
            Some(ambient) => {
                let span = tracing::debug_span!("firebird", otel.name = instrumentation::span_names::ENLIST);
                match enlistment::enlist(&cell, ambient.as_ref()).instrument(span).await {
                    Ok(enlisted) => Some(enlisted),
                    Err(e) => {
                        let taken = cell.lock().await.take();
                        if let Some(handle) = taken {
                            handle.release().await;
                        }
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        if let Some(session) = cell.lock().await.as_mut() {
            session.bind_warnings(Arc::downgrade(&self.events));
        }
        Ok((cell, enlistment))
    }

    /// Close the connection.
    ///
    /// A no-op when already closed. Cleanup failures are logged and the
    /// connection always ends closed.
    pub async fn close(&self) {
        let _guard = self.transition.lock().await;
        self.close_locked().await;
    }

    async fn close_locked(&self) {
        let (cell, enlistment, options) = {
            let mut shared = self.shared.lock();
            if shared.state == ConnectionState::Closed {
                return;
            }
            (
                shared.session.take(),
                shared.enlistment.take(),
                shared.options.clone(),
            )
        };

        let span = instrumentation::close_span(options.as_ref());
        async {
            if let Some(cell) = cell {
                release_session(cell, enlistment).await;
            }
            self.transition_to(ConnectionState::Closed);
            tracing::info!("connection closed");
        }
        .instrument(span)
        .await;
    }

    /// Close, switch to `database` and reopen.
    ///
    /// `database` may carry a `host[/port]:` prefix. A malformed prefix
    /// fails before the connection is closed. On an open failure the
    /// previous descriptor is restored and the connection stays closed.
    pub async fn change_database(&self, database: &str) -> Result<()> {
        let _guard = self.transition.lock().await;
        if database.trim().is_empty() {
            return Err(Error::InvalidOperation("database name is not valid".into()));
        }
        let (previous_string, previous_options) = {
            let shared = self.shared.lock();
            if shared.state != ConnectionState::Open {
                return Err(Error::InvalidOperation(
                    "ChangeDatabase requires an open connection".into(),
                ));
            }
            (shared.connection_string.clone(), shared.options.clone())
        };
        let Some(previous_options) = previous_options else {
            return Err(Error::InvalidOperation(
                "the connection string is not initialized".into(),
            ));
        };

        let span = tracing::info_span!(
            "firebird",
            otel.name = instrumentation::span_names::CHANGE_DATABASE,
            db.name = %database,
        );
        async {
            let next = previous_options.with_database(database)?;
            self.close_locked().await;

            {
                let mut shared = self.shared.lock();
                shared.connection_string = next.canonical();
                shared.options = Some(next);
            }

            if let Err(e) = self.open_locked().await {
                let mut shared = self.shared.lock();
                shared.connection_string = previous_string;
                shared.options = Some(previous_options);
                return Err(e);
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Begin a transaction with the descriptor's isolation level.
    pub async fn begin_transaction(&self) -> Result<Transaction> {
        let isolation = self.read_option(|o| o.isolation_level);
        self.begin_transaction_with(isolation, TransactionOptions::default(), None)
            .await
    }

    /// Begin a transaction with explicit settings.
    ///
    /// Fails with [`Error::InvalidOperation`] unless open, and with
    /// [`Error::TransactionState`] while another transaction is active.
    pub async fn begin_transaction_with(
        &self,
        isolation: IsolationLevel,
        options: TransactionOptions,
        name: Option<&str>,
    ) -> Result<Transaction> {
        let cell = self.open_session().map_err(|_| {
            Error::InvalidOperation(
                "BeginTransaction requires an open and available connection".into(),
            )
        })?;

        async {
            let mut guard = cell.lock().await;
            let session = guard.as_mut().ok_or_else(not_open)?;
            let handle = session.begin_transaction(&options.tpb(isolation)).await?;
            Ok::<_, Error>(Transaction::new(
                handle,
                isolation,
                name.map(str::to_string),
                &cell,
                session.abandon_flag(),
            ))
        }
        .instrument(instrumentation::begin_transaction_span(isolation))
        .await
    }

    /// Enlist an open connection in `ambient`.
    pub async fn enlist_transaction(&self, ambient: Arc<dyn AmbientTransaction>) -> Result<()> {
        let _guard = self.transition.lock().await;
        let cell = self.open_session()?;
        let enlisted = enlistment::enlist(&cell, ambient.as_ref()).await?;
        self.shared.lock().enlistment = Some(enlisted);
        Ok(())
    }

    /// Server version string.
    pub async fn server_version(&self) -> Result<String> {
        let cell = self.open_session()?;
        let mut guard = cell.lock().await;
        let session = guard.as_mut().ok_or_else(not_open)?;
        session.server_version().await
    }

    /// Id of the underlying session, for diagnostics.
    pub async fn session_id(&self) -> Option<u64> {
        let cell = self.open_session().ok()?;
        let guard = cell.lock().await;
        guard.as_ref().map(|session| session.id())
    }

    /// Open the server event channel. It is closed when the connection
    /// closes.
    pub async fn open_event_channel(&self) -> Result<()> {
        let cell = self.open_session()?;
        let mut guard = cell.lock().await;
        let session = guard.as_mut().ok_or_else(not_open)?;
        session.open_event_channel().await
    }

    /// Register a prepared statement handle to free when the connection
    /// closes.
    pub async fn track_statement(&self, handle: u32) -> Result<()> {
        let cell = self.open_session()?;
        let mut guard = cell.lock().await;
        let session = guard.as_mut().ok_or_else(not_open)?;
        session.track_statement(handle);
        Ok(())
    }

    fn open_session(&self) -> Result<Arc<SessionCell>> {
        let shared = self.shared.lock();
        match (&shared.session, shared.state) {
            (Some(cell), ConnectionState::Open) => Ok(cell.clone()),
            _ => Err(not_open()),
        }
    }

    fn transition_to(&self, next: ConnectionState) {
        let previous = std::mem::replace(&mut self.shared.lock().state, next);
        if previous != next {
            self.events.emit_state(previous, next);
        }
    }

    /// Number of session pools in the process.
    #[must_use]
    pub fn connection_pools_count() -> usize {
        pooling::pool_count()
    }

    /// Live sessions in the pool `connection` uses.
    #[must_use]
    pub fn pooled_connection_count(connection: &Connection) -> usize {
        connection
            .options()
            .map_or(0, |options| pooling::pooled_session_count(&options))
    }

    /// Clear the pool `connection` uses.
    pub async fn clear_pool(connection: &Connection) {
        if let Some(options) = connection.options() {
            pooling::clear_pool(&options).await;
        }
    }

    /// Clear every session pool.
    pub async fn clear_all_pools() {
        pooling::clear_all().await;
    }
}

/// Best-effort teardown of a session slot.
async fn release_session(cell: Arc<SessionCell>, enlistment: Option<Arc<EnlistedTransaction>>) {
    let mut guard = cell.lock().await;
    let Some(session) = guard.as_mut() else {
        return;
    };

    session.close_event_channel().await;
    session.unbind_warnings();

    let parked = enlistment
        .as_ref()
        .is_some_and(|enlisted| enlisted.park_if_pending());
    if !parked {
        if let Some(handle) = session.active_transaction() {
            if let Err(e) = session.rollback(handle).await {
                tracing::warn!(transaction = handle, error = %e, "rollback at close failed");
            }
        }
    }
    session.free_statements().await;

    if parked {
        tracing::debug!(
            session = session.id(),
            "session kept until the ambient transaction resolves"
        );
        return;
    }

    let taken = guard.take();
    drop(guard);
    if let Some(handle) = taken {
        handle.release().await;
    }
}

fn parse_descriptor(descriptor: &str) -> Result<Option<ConnectionOptions>> {
    if descriptor.trim().is_empty() {
        return Ok(None);
    }
    let options = ConnectionOptions::parse(descriptor)?;
    options.validate()?;
    Ok(Some(options))
}

fn not_open() -> Error {
    Error::InvalidOperation("the connection is closed".into())
}

#[async_trait]
impl DatabaseConnection for Connection {
    async fn open(&self) -> Result<()> {
        Connection::open(self).await
    }

    async fn close(&self) {
        Connection::close(self).await;
    }

    async fn begin_transaction(&self) -> Result<Transaction> {
        Connection::begin_transaction(self).await
    }

    fn state(&self) -> ConnectionState {
        Connection::state(self)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared.lock();
        f.debug_struct("Connection")
            .field("state", &shared.state)
            .field("options", &shared.options)
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let shared = self.shared.get_mut();
        let Some(cell) = shared.session.take() else {
            return;
        };
        let enlistment = shared.enlistment.take();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(release_session(cell, enlistment));
            }
            Err(_) => {
                tracing::debug!("no runtime, dropping open session without detach");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = "data source=localhost;database=test.fdb;user id=SYSDBA;password=masterkey";

    #[test]
    fn test_new_is_closed() {
        let conn = Connection::new(DESCRIPTOR).unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(conn.database(), "test.fdb");
        assert_eq!(conn.data_source(), "localhost");
        assert_eq!(conn.packet_size(), 8192);
    }

    #[test]
    fn test_new_validates() {
        assert!(matches!(
            Connection::new("database=x.fdb"),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            Connection::new("database=x.fdb;user=u;flavour=mint"),
            Err(Error::InvalidDescriptor(_))
        ));
    }

    #[tokio::test]
    async fn test_open_without_descriptor() {
        let conn = Connection::new("").unwrap();
        assert!(matches!(conn.open().await, Err(Error::InvalidOperation(_))));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_close_when_closed_is_silent() {
        let conn = Connection::new(DESCRIPTOR).unwrap();
        let events = Arc::new(Mutex::new(0));
        let counter = events.clone();
        conn.subscribe_state_changes(move |_| *counter.lock() += 1);

        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(*events.lock(), 0);
    }

    #[tokio::test]
    async fn test_begin_transaction_requires_open() {
        let conn = Connection::new(DESCRIPTOR).unwrap();
        assert!(matches!(
            conn.begin_transaction().await,
            Err(Error::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_enlist_without_ambient_fails_before_connecting() {
        let conn = Connection::new(&format!("{DESCRIPTOR};enlist=true")).unwrap();
        let events = Arc::new(Mutex::new(0));
        let counter = events.clone();
        conn.subscribe_state_changes(move |_| *counter.lock() += 1);

        assert!(matches!(conn.open().await, Err(Error::InvalidOperation(_))));
        assert_eq!(*events.lock(), 0);
    }

    #[tokio::test]
    async fn test_change_database_requires_open() {
        let conn = Connection::new(DESCRIPTOR).unwrap();
        assert!(matches!(
            conn.change_database("other.fdb").await,
            Err(Error::InvalidOperation(_))
        ));
        assert!(matches!(
            conn.change_database("  ").await,
            Err(Error::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_set_connection_string_while_closed() {
        let conn = Connection::new("").unwrap();
        conn.set_connection_string(DESCRIPTOR).await.unwrap();
        assert_eq!(conn.database(), "test.fdb");
        assert!(conn.set_connection_string("dialect=9").await.is_err());
        assert_eq!(conn.connection_string(), DESCRIPTOR);
    }

    #[tokio::test]
    async fn test_server_version_requires_open() {
        let conn = Connection::new(DESCRIPTOR).unwrap();
        assert!(matches!(
            conn.server_version().await,
            Err(Error::InvalidOperation(_))
        ));
        assert!(conn.session_id().await.is_none());
    }
}
