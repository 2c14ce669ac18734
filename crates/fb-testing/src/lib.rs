//! # fb-testing
//!
//! An in-process mock Firebird server for integration tests.
//!
//! [`MockServer`] listens on an ephemeral local port and speaks the subset of
//! the remote protocol used for session management: connect, attach,
//! create, drop, detach, transactions, database info, the event channel
//! request and statement release. It keeps databases as an in-memory set of
//! paths and records every request it receives.
//!
//! ```rust,ignore
//! let server = MockServer::start().await?;
//! server.add_database("test.fdb");
//! let descriptor = server.descriptor("test.fdb");
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use fb_codec::{PacketStream, ServerCodec};
use fb_protocol::connect::DEFAULT_OFFERS;
use fb_protocol::dpb::{self, tags};
use fb_protocol::info::{self, items};
use fb_protocol::status::codes;
use fb_protocol::{
    AcceptResponse, GenericResponse, Operation, Request, ServerPacket, StatusArg, StatusVector,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Version string reported through database info.
pub const SERVER_VERSION: &str = "LI-V3.0.10.33601 Firebird 3.0 (mock)";

/// Failure and warning injection.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Answer `op_connect` with `op_reject`.
    pub reject_connect: bool,
    /// Fail every attach with this code.
    pub attach_error: Option<u32>,
    /// Wait this long before answering an attach.
    pub attach_delay: Option<Duration>,
    /// Fail every transaction start with this code.
    pub transaction_error: Option<u32>,
    /// Attach a warning with this code to every transaction start.
    pub transaction_warning: Option<u32>,
}

#[derive(Default)]
struct ServerState {
    databases: Mutex<HashSet<String>>,
    requests: Mutex<Vec<Request>>,
    script: Mutex<Script>,
    accepted: AtomicUsize,
    active: AtomicUsize,
    event_channels: AtomicUsize,
    next_handle: AtomicU32,
    kill: Notify,
}

impl ServerState {
    fn handle(&self) -> u32 {
        self.next_handle.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// A mock Firebird server bound to `127.0.0.1`.
///
/// The server stops accepting when dropped and closes open sockets.
pub struct MockServer {
    addr: SocketAddr,
    event_port: u16,
    state: Arc<ServerState>,
    tasks: Vec<JoinHandle<()>>,
}

impl MockServer {
    /// Bind to an ephemeral port and start serving.
    pub async fn start() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let events = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let event_port = events.local_addr()?.port();
        let state = Arc::new(ServerState::default());

        let main = tokio::spawn(accept_loop(listener, state.clone(), event_port));
        let aux = tokio::spawn(event_loop(events, state.clone()));
        tracing::debug!(%addr, event_port, "mock server listening");

        Ok(Self {
            addr,
            event_port,
            state,
            tasks: vec![main, aux],
        })
    }

    /// Listening address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Listening port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Port of the auxiliary event listener.
    #[must_use]
    pub fn event_port(&self) -> u16 {
        self.event_port
    }

    /// Connection descriptor for `database` on this server.
    #[must_use]
    pub fn descriptor(&self, database: &str) -> String {
        format!(
            "data source=127.0.0.1;port={};database={database};user id=SYSDBA;password=masterkey",
            self.port()
        )
    }

    /// Make `path` attachable.
    pub fn add_database(&self, path: &str) {
        self.state.databases.lock().insert(path.to_string());
    }

    /// Whether `path` exists.
    #[must_use]
    pub fn has_database(&self, path: &str) -> bool {
        self.state.databases.lock().contains(path)
    }

    /// Replace the failure script.
    pub fn set_script(&self, script: Script) {
        *self.state.script.lock() = script;
    }

    /// Edit the failure script in place.
    pub fn script(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.state.script.lock());
    }

    /// Every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<Request> {
        self.state.requests.lock().clone()
    }

    /// Number of received requests with operation `op`.
    #[must_use]
    pub fn count(&self, op: Operation) -> usize {
        self.state
            .requests
            .lock()
            .iter()
            .filter(|r| r.operation() == op)
            .count()
    }

    /// Sockets accepted since start.
    #[must_use]
    pub fn accepted_connections(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// Sockets currently open.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    /// Event channel sockets accepted since start.
    #[must_use]
    pub fn event_channels(&self) -> usize {
        self.state.event_channels.load(Ordering::SeqCst)
    }

    /// Close every open session socket without a reply.
    pub fn kill_connections(&self) {
        self.state.kill.notify_waiters();
    }

    /// Wait until at most `n` sockets are open, up to `timeout`.
    pub async fn wait_for_active(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.active_connections() > n {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        self.state.kill.notify_waiters();
    }
}

impl std::fmt::Debug for MockServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockServer")
            .field("addr", &self.addr)
            .field("accepted", &self.accepted_connections())
            .field("active", &self.active_connections())
            .finish_non_exhaustive()
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<ServerState>, event_port: u16) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "mock accept failed");
                continue;
            }
        };
        state.accepted.fetch_add(1, Ordering::SeqCst);
        state.active.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(%peer, "mock connection accepted");

        let state = state.clone();
        tokio::spawn(async move {
            serve(socket, &state, event_port).await;
            state.active.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

async fn event_loop(listener: TcpListener, state: Arc<ServerState>) {
    let mut held = Vec::new();
    while let Ok((socket, _)) = listener.accept().await {
        state.event_channels.fetch_add(1, Ordering::SeqCst);
        held.push(socket);
    }
}

/// Per-socket session state.
#[derive(Default)]
struct Attachment {
    database: Option<String>,
    transactions: HashSet<u32>,
}

async fn serve(socket: TcpStream, state: &ServerState, event_port: u16) {
    let mut stream = PacketStream::with_codec(socket, ServerCodec::new());
    let mut attachment = Attachment::default();

    loop {
        let request = tokio::select! {
            next = stream.next() => match next {
                Some(Ok(request)) => request,
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "mock decode failed");
                    break;
                }
                None => break,
            },
            () = state.kill.notified() => break,
        };
        state.requests.lock().push(request.clone());

        let Some(reply) = answer(request, state, &mut attachment, event_port).await else {
            break;
        };
        if stream.send(reply).await.is_err() {
            break;
        }
    }
}

/// Reply to one request; `None` closes the socket.
async fn answer(
    request: Request,
    state: &ServerState,
    attachment: &mut Attachment,
    event_port: u16,
) -> Option<ServerPacket> {
    let script = state.script.lock().clone();
    let packet = match request {
        Request::Connect(connect) => {
            if script.reject_connect {
                ServerPacket::Reject
            } else {
                let offer = connect.preferred().copied().unwrap_or(DEFAULT_OFFERS[0]);
                ServerPacket::Accept(AcceptResponse::for_offer(&offer))
            }
        }
        Request::Attach { database, .. } => {
            if let Some(delay) = script.attach_delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(code) = script.attach_error {
                failed(code, &[])
            } else if !state.databases.lock().contains(&database) {
                failed(codes::IO_ERROR, &["open", &database])
            } else {
                attachment.database = Some(database);
                ok(state.handle())
            }
        }
        Request::Create { database, dpb } => {
            let overwrite = dpb_int(&dpb, tags::OVERWRITE).unwrap_or(0) != 0;
            let mut databases = state.databases.lock();
            if databases.contains(&database) && !overwrite {
                failed(codes::IO_ERROR, &["create", &database])
            } else {
                databases.insert(database.clone());
                attachment.database = Some(database);
                ok(state.handle())
            }
        }
        Request::DropDatabase { .. } => match attachment.database.take() {
            Some(database) => {
                state.databases.lock().remove(&database);
                ok(0)
            }
            None => failed(codes::BAD_DB_HANDLE, &[]),
        },
        Request::Detach { .. } => match attachment.database.take() {
            Some(_) => ok(0),
            None => failed(codes::BAD_DB_HANDLE, &[]),
        },
        Request::Transaction { .. } => {
            if let Some(code) = script.transaction_error {
                failed(code, &[])
            } else {
                let handle = state.handle();
                attachment.transactions.insert(handle);
                let mut response = GenericResponse::ok(handle);
                if let Some(code) = script.transaction_warning {
                    response.status = StatusVector::from_args(vec![
                        StatusArg::Gds(0),
                        StatusArg::Warning(code),
                        StatusArg::String("mock".into()),
                    ]);
                }
                ServerPacket::Response(response)
            }
        }
        Request::Commit { tr_handle } | Request::Rollback { tr_handle } => {
            if attachment.transactions.remove(&tr_handle) {
                ok(0)
            } else {
                failed(codes::BAD_TRANS_HANDLE, &[])
            }
        }
        Request::CommitRetaining { tr_handle }
        | Request::RollbackRetaining { tr_handle }
        | Request::Prepare2 { tr_handle, .. } => {
            if attachment.transactions.contains(&tr_handle) {
                ok(0)
            } else {
                failed(codes::BAD_TRANS_HANDLE, &[])
            }
        }
        Request::InfoDatabase { .. } => {
            let version = info::encode_version_strings(&[SERVER_VERSION]);
            let data = info::encode_items(&[
                (items::FIREBIRD_VERSION, &version[..]),
                (items::ISC_VERSION, &version[..]),
            ]);
            ServerPacket::Response(GenericResponse::ok(0).with_data(data))
        }
        Request::ConnectRequest { .. } => {
            // sockaddr_in: family, port, address, padding
            let mut address = vec![0u8, 2];
            address.extend_from_slice(&event_port.to_be_bytes());
            address.extend_from_slice(&[127, 0, 0, 1]);
            address.extend_from_slice(&[0; 8]);
            ServerPacket::Response(GenericResponse::ok(0).with_data(Bytes::from(address)))
        }
        Request::FreeStatement { .. } => ok(0),
        Request::Disconnect => return None,
    };
    Some(packet)
}

fn ok(handle: u32) -> ServerPacket {
    ServerPacket::Response(GenericResponse::ok(handle))
}

fn failed(code: u32, params: &[&str]) -> ServerPacket {
    ServerPacket::Response(GenericResponse::failed(StatusVector::error(code, params)))
}

fn dpb_int(dpb: &[u8], tag: u8) -> Option<i32> {
    let (_, items) = dpb::parse_items(dpb).ok()?;
    items.iter().rev().find(|(t, _)| *t == tag).map(|(_, value)| {
        let mut raw = [0u8; 4];
        for (slot, byte) in raw.iter_mut().zip(value.iter()) {
            *slot = *byte;
        }
        i32::from_le_bytes(raw)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use fb_protocol::ConnectRequest;

    async fn client(server: &MockServer) -> PacketStream<TcpStream> {
        PacketStream::new(TcpStream::connect(server.addr()).await.unwrap())
    }

    async fn round_trip(stream: &mut PacketStream<TcpStream>, request: Request) -> ServerPacket {
        stream.send(request).await.unwrap();
        stream.next().await.expect("reply").unwrap()
    }

    #[tokio::test]
    async fn test_handshake_and_attach() {
        let server = MockServer::start().await.unwrap();
        server.add_database("a.fdb");
        let mut stream = client(&server).await;

        let accept = round_trip(
            &mut stream,
            Request::Connect(ConnectRequest::new("a.fdb", "me", "here")),
        )
        .await;
        assert!(matches!(accept, ServerPacket::Accept(_)));

        let attach = round_trip(
            &mut stream,
            Request::Attach {
                database: "a.fdb".into(),
                dpb: Bytes::from_static(&[tags::VERSION1]),
            },
        )
        .await;
        assert!(matches!(attach, ServerPacket::Response(ref r) if !r.status.is_error()));
        assert_eq!(server.count(Operation::Attach), 1);
        assert_eq!(server.accepted_connections(), 1);
    }

    #[tokio::test]
    async fn test_attach_unknown_database_fails() {
        let server = MockServer::start().await.unwrap();
        let mut stream = client(&server).await;
        round_trip(
            &mut stream,
            Request::Connect(ConnectRequest::new("x", "me", "here")),
        )
        .await;
        let reply = round_trip(
            &mut stream,
            Request::Attach {
                database: "missing.fdb".into(),
                dpb: Bytes::from_static(&[tags::VERSION1]),
            },
        )
        .await;
        assert!(matches!(
            reply,
            ServerPacket::Response(ref r) if r.status.error_code() == Some(codes::IO_ERROR)
        ));
    }

    #[tokio::test]
    async fn test_reject_script() {
        let server = MockServer::start().await.unwrap();
        server.script(|s| s.reject_connect = true);
        let mut stream = client(&server).await;
        let reply = round_trip(
            &mut stream,
            Request::Connect(ConnectRequest::new("x", "me", "here")),
        )
        .await;
        assert_eq!(reply, ServerPacket::Reject);
    }

    #[test]
    fn test_dpb_int_reads_last_value() {
        let mut buffer = fb_protocol::ParameterBuffer::new();
        buffer.append_int(tags::OVERWRITE, 0);
        buffer.append_int(tags::OVERWRITE, 1);
        assert_eq!(dpb_int(buffer.as_bytes(), tags::OVERWRITE), Some(1));
        assert_eq!(dpb_int(buffer.as_bytes(), tags::PAGE_SIZE), None);
    }
}
