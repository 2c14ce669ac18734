//! Process-wide pool teardown.
//!
//! Runs in its own test binary: clearing every pool would interfere with
//! tests that share the process.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::time::Duration;

use fb_client::{Connection, ConnectionState, Error};
use fb_protocol::Operation;

/// Tests in this binary clear the process-wide pool table, so they run one
/// at a time.
static SERIAL: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

#[tokio::test]
async fn test_clear_all_pools() {
    let _serial = SERIAL.lock().await;
    let first = common::server(&["a.fdb"]).await;
    let second = common::server(&["b.fdb"]).await;

    let a = Connection::new(&first.descriptor("a.fdb")).unwrap();
    let b = Connection::new(&second.descriptor("b.fdb")).unwrap();
    a.open().await.unwrap();
    b.open().await.unwrap();
    b.close().await;
    assert_eq!(Connection::connection_pools_count(), 2);

    Connection::clear_all_pools().await;
    assert_eq!(Connection::connection_pools_count(), 0);
    assert_eq!(second.count(Operation::Detach), 1);

    // the open connection keeps working and its session is disposed at close
    let mut tx = a.begin_transaction().await.unwrap();
    tx.commit().await.unwrap();
    a.close().await;
    assert_eq!(first.count(Operation::Detach), 1);

    a.open().await.unwrap();
    assert_eq!(Connection::connection_pools_count(), 1);
    a.close().await;
}

#[tokio::test]
async fn test_clear_all_pools_fails_waiting_open() {
    let _serial = SERIAL.lock().await;
    let server = common::server(&["main.fdb"]).await;
    let descriptor = format!(
        "{};max pool size=1;connection timeout=30",
        server.descriptor("main.fdb")
    );
    let holder = Connection::new(&descriptor).unwrap();
    holder.open().await.unwrap();

    let waiter = {
        let descriptor = descriptor.clone();
        tokio::spawn(async move {
            let conn = Connection::new(&descriptor).unwrap();
            let result = conn.open().await;
            (result, conn.state())
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!waiter.is_finished());

    Connection::clear_all_pools().await;
    let (result, state) = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waiting open must not run to the checkout timeout")
        .unwrap();
    assert!(matches!(result, Err(Error::InvalidOperation(_))));
    assert_eq!(state, ConnectionState::Closed);

    // the held session is disposed at close and a fresh pool serves the next open
    holder.close().await;
    assert_eq!(server.count(Operation::Detach), 1);
    holder.open().await.unwrap();
    assert_eq!(server.accepted_connections(), 2);
    holder.close().await;
    Connection::clear_all_pools().await;
}
