//! One live protocol session with the server.
//!
//! A [`Session`] owns the transport, the attached database handle and at
//! most one active transaction. It is created by [`Session::connect`]
//! (directly or through the pool) and released with [`Session::dispose`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use bytes::Bytes;
use fb_codec::{CodecError, PacketStream};
use fb_protocol::charset::Charset;
use fb_protocol::dpb::tags;
use fb_protocol::info::{DatabaseInfo, VERSION_ITEMS};
use fb_protocol::message::{DSQL_DROP, P_REQ_ASYNC};
use fb_protocol::status::codes;
use fb_protocol::{
    ConnectRequest, GenericResponse, ParameterBuffer, ProtocolVersion, Request, ServerPacket,
    StatusVector,
};
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::config::ConnectionOptions;
use crate::error::{DatabaseError, Error, Result};
use crate::events::{EventHub, ServerWarning};

/// Keep-alive interval sent in every DPB: 120 seconds.
const DUMMY_PACKET_INTERVAL: [u8; 4] = [120, 10, 0, 0];
const INFO_BUFFER_LENGTH: u32 = 1024;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Marks the active transaction of a session as abandoned by its owner.
///
/// Each transaction gets its own flag, so raising a stale one never touches
/// a later transaction that happens to reuse the server handle.
#[derive(Debug, Clone, Default)]
pub(crate) struct AbandonFlag(Arc<AtomicBool>);

impl AbandonFlag {
    pub(crate) fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A protocol session attached to one database.
pub struct Session {
    id: u64,
    host: String,
    database: String,
    stream: PacketStream<TcpStream>,
    protocol: ProtocolVersion,
    db_handle: u32,
    charset: &'static Charset,
    dialect: u8,
    transaction: Option<u32>,
    abandoned: AbandonFlag,
    warning_sink: Option<Weak<EventHub>>,
    pooled: bool,
    enlisted: bool,
    broken: bool,
    statements: Vec<u32>,
    event_channel: Option<TcpStream>,
    server_version: Option<String>,
    created_at: Instant,
}

impl Session {
    /// Connect and attach to the database named by `options`.
    ///
    /// The whole exchange is bounded by the connection timeout; a zero
    /// timeout waits indefinitely.
    pub async fn connect(options: &ConnectionOptions) -> Result<Self> {
        let timeout = options.connection_timeout;
        if timeout.is_zero() {
            return Self::attach(options).await;
        }
        tokio::time::timeout(timeout, Self::attach(options))
            .await
            .map_err(|_| Error::ConnectTimeout(timeout))?
    }

    async fn attach(options: &ConnectionOptions) -> Result<Self> {
        let dpb = connect_dpb(options)?;
        let mut session = Self::handshake(options).await?;
        let response = session
            .round_trip(Request::Attach {
                database: options.database.clone(),
                dpb: dpb.into_bytes(),
            })
            .await?;
        session.db_handle = response.handle;

        tracing::debug!(
            session = session.id,
            host = %session.host,
            database = %session.database,
            protocol = ?session.protocol,
            "attached"
        );
        Ok(session)
    }

    /// Connect and create the database named by `options` using `dpb`.
    ///
    /// The returned session is attached to the new database.
    pub async fn create(options: &ConnectionOptions, dpb: ParameterBuffer) -> Result<Self> {
        let timeout = options.connection_timeout;
        let create = async {
            let mut session = Self::handshake(options).await?;
            let response = session
                .round_trip(Request::Create {
                    database: options.database.clone(),
                    dpb: dpb.into_bytes(),
                })
                .await?;
            session.db_handle = response.handle;
            Ok::<_, Error>(session)
        };
        if timeout.is_zero() {
            return create.await;
        }
        tokio::time::timeout(timeout, create)
            .await
            .map_err(|_| Error::ConnectTimeout(timeout))?
    }

    /// TCP connect and `op_connect` negotiation.
    async fn handshake(options: &ConnectionOptions) -> Result<Self> {
        let host = options.data_source.clone();
        let charset = options.resolved_charset()?;

        let tcp = TcpStream::connect((host.as_str(), options.port))
            .await
            .map_err(|e| DatabaseError::network(&host, e))?;
        if let Err(e) = tcp.set_nodelay(true) {
            tracing::trace!(error = %e, "could not disable Nagle");
        }

        let mut session = Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            host,
            database: options.database.clone(),
            stream: PacketStream::new(tcp),
            protocol: ProtocolVersion::V10,
            db_handle: 0,
            charset,
            dialect: options.dialect,
            transaction: None,
            abandoned: AbandonFlag::default(),
            warning_sink: None,
            pooled: false,
            enlisted: false,
            broken: false,
            statements: Vec::new(),
            event_channel: None,
            server_version: None,
            created_at: Instant::now(),
        };

        let request = ConnectRequest::new(
            options.database.clone(),
            &local_user(),
            &local_host(),
        );
        session.send(Request::Connect(request)).await?;

        match session.next_packet().await? {
            ServerPacket::Accept(accept) => {
                session.protocol = accept.version;
                tracing::trace!(version = ?accept.version, "protocol accepted");
                Ok(session)
            }
            ServerPacket::Reject => Err(StatusVector::error(codes::CONNECT_REJECT, &[]).into()),
            ServerPacket::Response(response) if response.status.is_error() => {
                Err(response.status.into())
            }
            other => Err(session.fail(format!("unexpected handshake answer {other:?}"))),
        }
    }

    /// Unique id of this session.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Server host this session is connected to.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Database path this session is attached to.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Negotiated protocol version.
    #[must_use]
    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// Connection character set.
    #[must_use]
    pub fn charset(&self) -> &'static Charset {
        self.charset
    }

    /// SQL dialect requested at attach.
    #[must_use]
    pub fn dialect(&self) -> u8 {
        self.dialect
    }

    /// Handle of the active transaction.
    #[must_use]
    pub fn active_transaction(&self) -> Option<u32> {
        self.transaction
    }

    /// Whether the session belongs to a pool.
    #[must_use]
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    pub(crate) fn set_pooled(&mut self, pooled: bool) {
        self.pooled = pooled;
    }

    /// Whether the session is enlisted in an ambient transaction.
    #[must_use]
    pub fn is_enlisted(&self) -> bool {
        self.enlisted
    }

    pub(crate) fn set_enlisted(&mut self, enlisted: bool) {
        self.enlisted = enlisted;
    }

    /// Whether a transport failure made the session unusable.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// When the session was established.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Route server warnings to `hub`. The session holds a weak reference.
    pub(crate) fn bind_warnings(&mut self, hub: Weak<EventHub>) {
        self.warning_sink = Some(hub);
    }

    pub(crate) fn unbind_warnings(&mut self) {
        self.warning_sink = None;
    }

    /// Start a transaction. Fails if one is already active.
    ///
    /// An abandoned transaction is rolled back first.
    pub async fn begin_transaction(&mut self, tpb: &ParameterBuffer) -> Result<u32> {
        self.settle_abandoned().await?;
        if self.transaction.is_some() {
            return Err(Error::TransactionState(
                "a transaction is already active on this connection".into(),
            ));
        }
        let response = self
            .round_trip(Request::Transaction {
                db_handle: self.db_handle,
                tpb: Bytes::copy_from_slice(tpb.as_bytes()),
            })
            .await?;
        self.transaction = Some(response.handle);
        self.abandoned = AbandonFlag::default();
        tracing::debug!(session = self.id, transaction = response.handle, "transaction started");
        Ok(response.handle)
    }

    /// Flag the owner of the active transaction raises when it goes away
    /// unresolved.
    pub(crate) fn abandon_flag(&self) -> AbandonFlag {
        self.abandoned.clone()
    }

    /// Whether the active transaction was abandoned and still needs a
    /// rollback.
    #[must_use]
    pub fn has_abandoned_transaction(&self) -> bool {
        self.transaction.is_some() && self.abandoned.is_raised()
    }

    /// Roll back the active transaction if its owner abandoned it.
    pub(crate) async fn settle_abandoned(&mut self) -> Result<()> {
        let Some(handle) = self.transaction else {
            return Ok(());
        };
        if !self.abandoned.is_raised() {
            return Ok(());
        }
        tracing::debug!(session = self.id, transaction = handle, "rolling back abandoned transaction");
        self.rollback(handle).await
    }

    /// Commit and resolve the active transaction.
    pub async fn commit(&mut self, handle: u32) -> Result<()> {
        self.ensure_active(handle)?;
        self.round_trip(Request::Commit { tr_handle: handle }).await?;
        self.transaction = None;
        tracing::debug!(session = self.id, transaction = handle, "committed");
        Ok(())
    }

    /// Roll back and resolve the active transaction.
    pub async fn rollback(&mut self, handle: u32) -> Result<()> {
        self.ensure_active(handle)?;
        self.round_trip(Request::Rollback { tr_handle: handle })
            .await?;
        self.transaction = None;
        tracing::debug!(session = self.id, transaction = handle, "rolled back");
        Ok(())
    }

    /// Commit, keeping the transaction context open.
    pub async fn commit_retaining(&mut self, handle: u32) -> Result<()> {
        self.ensure_active(handle)?;
        self.round_trip(Request::CommitRetaining { tr_handle: handle })
            .await?;
        Ok(())
    }

    /// Roll back, keeping the transaction context open.
    pub async fn rollback_retaining(&mut self, handle: u32) -> Result<()> {
        self.ensure_active(handle)?;
        self.round_trip(Request::RollbackRetaining { tr_handle: handle })
            .await?;
        Ok(())
    }

    /// First phase of two-phase commit.
    pub async fn prepare(&mut self, handle: u32) -> Result<()> {
        self.ensure_active(handle)?;
        self.round_trip(Request::Prepare2 {
            tr_handle: handle,
            message: Bytes::new(),
        })
        .await?;
        Ok(())
    }

    fn ensure_active(&self, handle: u32) -> Result<()> {
        match self.transaction {
            Some(active) if active == handle => Ok(()),
            _ => Err(Error::TransactionState(format!(
                "transaction {handle} is not active on this connection"
            ))),
        }
    }

    /// Liveness probe.
    pub async fn ping(&mut self) -> Result<()> {
        self.info(&VERSION_ITEMS).await.map(|_| ())
    }

    /// Server version string, fetched once and cached.
    pub async fn server_version(&mut self) -> Result<String> {
        if let Some(version) = &self.server_version {
            return Ok(version.clone());
        }
        let data = self.info(&VERSION_ITEMS).await?;
        let info = DatabaseInfo::parse(&data)?;
        let version = info.server_version().unwrap_or_default().to_string();
        self.server_version = Some(version.clone());
        Ok(version)
    }

    async fn info(&mut self, items: &[u8]) -> Result<Bytes> {
        let response = self
            .round_trip(Request::InfoDatabase {
                db_handle: self.db_handle,
                items: Bytes::copy_from_slice(items),
                buffer_length: INFO_BUFFER_LENGTH,
            })
            .await?;
        Ok(response.data)
    }

    /// Open the auxiliary socket the server uses to deliver events.
    pub async fn open_event_channel(&mut self) -> Result<()> {
        if self.event_channel.is_some() {
            return Ok(());
        }
        let response = self
            .round_trip(Request::ConnectRequest {
                kind: P_REQ_ASYNC,
                db_handle: self.db_handle,
            })
            .await?;

        // sockaddr: family (2 bytes), port (2 bytes, network order), ...
        let data = &response.data;
        if data.len() < 4 {
            return Err(self.fail("malformed event channel address"));
        }
        let port = u16::from_be_bytes([data[2], data[3]]);
        let channel = TcpStream::connect((self.host.as_str(), port))
            .await
            .map_err(|e| DatabaseError::network(&self.host, e))?;
        self.event_channel = Some(channel);
        tracing::debug!(session = self.id, port, "event channel opened");
        Ok(())
    }

    /// Whether the event channel is open.
    #[must_use]
    pub fn has_event_channel(&self) -> bool {
        self.event_channel.is_some()
    }

    /// Close the event channel, if open.
    pub async fn close_event_channel(&mut self) {
        if let Some(mut channel) = self.event_channel.take() {
            if let Err(e) = channel.shutdown().await {
                tracing::warn!(session = self.id, error = %e, "event channel shutdown failed");
            }
        }
    }

    /// Register a prepared statement handle to free at close.
    pub fn track_statement(&mut self, handle: u32) {
        self.statements.push(handle);
    }

    /// Statement handles awaiting release.
    #[must_use]
    pub fn tracked_statements(&self) -> &[u32] {
        &self.statements
    }

    /// Release every tracked statement. Failures are logged.
    pub async fn free_statements(&mut self) {
        for handle in std::mem::take(&mut self.statements) {
            let request = Request::FreeStatement {
                stmt_handle: handle,
                option: DSQL_DROP,
            };
            if let Err(e) = self.round_trip(request).await {
                tracing::warn!(session = self.id, statement = handle, error = %e, "free statement failed");
            }
        }
    }

    /// Drop the attached database. The session is unusable afterwards.
    pub async fn drop_database(&mut self) -> Result<()> {
        self.round_trip(Request::DropDatabase {
            db_handle: self.db_handle,
        })
        .await?;
        self.disconnect().await;
        Ok(())
    }

    /// Roll back any active transaction and detach from the database.
    pub async fn detach(&mut self) -> Result<()> {
        self.close_event_channel().await;
        if let Some(handle) = self.transaction {
            if let Err(e) = self.rollback(handle).await {
                tracing::warn!(session = self.id, error = %e, "rollback before detach failed");
                self.transaction = None;
            }
        }
        self.round_trip(Request::Detach {
            db_handle: self.db_handle,
        })
        .await?;
        self.disconnect().await;
        tracing::debug!(session = self.id, "detached");
        Ok(())
    }

    /// Best-effort release. Errors are logged, never returned.
    pub async fn dispose(mut self) {
        if self.broken {
            tracing::debug!(session = self.id, "dropping broken session");
            return;
        }
        if let Err(e) = self.detach().await {
            tracing::warn!(session = self.id, error = %e, "detach failed during dispose");
        }
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.send(Request::Disconnect).await {
            tracing::trace!(session = self.id, error = %e, "disconnect not delivered");
        }
        self.broken = true;
    }

    /// Send one request and read its response.
    async fn round_trip(&mut self, request: Request) -> Result<GenericResponse> {
        tracing::trace!(session = self.id, op = ?request.operation(), "request");
        self.send(request).await?;
        match self.next_packet().await? {
            ServerPacket::Response(response) => {
                self.dispatch_warnings(&response.status);
                if response.status.is_error() {
                    return Err(response.status.into());
                }
                Ok(response)
            }
            other => Err(self.fail(format!("unexpected packet {other:?}"))),
        }
    }

    async fn send(&mut self, request: Request) -> Result<()> {
        match self.stream.send(request).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Next packet other than `op_dummy`.
    async fn next_packet(&mut self) -> Result<ServerPacket> {
        loop {
            match self.stream.next().await {
                Some(Ok(ServerPacket::Dummy)) => continue,
                Some(Ok(packet)) => return Ok(packet),
                Some(Err(e)) => return Err(self.fail(e)),
                None => return Err(self.fail(CodecError::ConnectionClosed)),
            }
        }
    }

    /// Mark the session broken and translate a transport failure.
    fn fail(&mut self, detail: impl fmt::Display) -> Error {
        self.broken = true;
        tracing::debug!(session = self.id, error = %detail, "session broken");
        DatabaseError::network(&self.host, detail).into()
    }

    fn dispatch_warnings(&self, status: &StatusVector) {
        let warnings = status.warnings();
        if warnings.is_empty() {
            return;
        }
        let hub = self.warning_sink.as_ref().and_then(Weak::upgrade);
        for warning in warnings {
            let warning = ServerWarning {
                code: warning.code,
                message: warning.message,
            };
            match &hub {
                Some(hub) => hub.emit_warning(&warning),
                None => tracing::debug!(session = self.id, message = %warning.message, "unrouted server warning"),
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("database", &self.database)
            .field("protocol", &self.protocol)
            .field("transaction", &self.transaction)
            .field("abandoned", &self.abandoned.is_raised())
            .field("pooled", &self.pooled)
            .field("enlisted", &self.enlisted)
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

/// DPB sent with `op_attach`.
pub fn connect_dpb(options: &ConnectionOptions) -> Result<ParameterBuffer> {
    let charset = options.resolved_charset()?;
    let timeout = i32::try_from(options.connection_timeout.as_secs()).unwrap_or(i32::MAX);

    let mut dpb = ParameterBuffer::new();
    dpb.append_bytes(tags::DUMMY_PACKET_INTERVAL, &DUMMY_PACKET_INTERVAL)?;
    dpb.append_bytes(tags::SQL_DIALECT, &[options.dialect, 0, 0, 0])?;
    dpb.append_str(tags::LC_CTYPE, charset.name())?;
    if let Some(role) = &options.role {
        dpb.append_str(tags::SQL_ROLE_NAME, role)?;
    }
    dpb.append_int(tags::CONNECT_TIMEOUT, timeout);
    dpb.append_str(tags::USER_NAME, &options.user)?;
    dpb.append_str(tags::PASSWORD, &options.password)?;
    if options.no_db_triggers {
        dpb.append_int(tags::NO_DB_TRIGGERS, 1);
    }
    if options.no_garbage_collect {
        dpb.append_int(tags::NO_GARBAGE_COLLECT, 0);
    }
    Ok(dpb)
}

/// DPB sent with `op_create`.
pub fn create_dpb(
    options: &ConnectionOptions,
    page_size: u32,
    forced_writes: bool,
    overwrite: bool,
) -> Result<ParameterBuffer> {
    let charset = options.resolved_charset()?;
    let page_size = if page_size > 0 {
        page_size
    } else {
        options.page_size
    };

    let mut dpb = ParameterBuffer::new();
    dpb.append_bytes(tags::DUMMY_PACKET_INTERVAL, &DUMMY_PACKET_INTERVAL)?;
    dpb.append_str(tags::USER_NAME, &options.user)?;
    dpb.append_str(tags::PASSWORD, &options.password)?;
    dpb.append_bytes(tags::SQL_DIALECT, &[options.dialect, 0, 0, 0])?;
    if charset.id() != fb_protocol::charset::NONE.id() {
        dpb.append_str(tags::SET_DB_CHARSET, charset.name())?;
    }
    dpb.append_short(tags::FORCE_WRITE, i16::from(forced_writes));
    dpb.append_int(tags::OVERWRITE, i32::from(overwrite));
    if page_size > 0 {
        dpb.append_int(tags::PAGE_SIZE, i32::try_from(page_size).unwrap_or(i32::MAX));
    }
    Ok(dpb)
}

fn local_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default()
}

fn local_host() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}
