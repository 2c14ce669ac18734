//! Ambient transaction enlistment tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::Arc;

use common::TestAmbient;
use fb_client::{Connection, ConnectionOptions, ConnectionState, Error, IsolationLevel, pooling};
use fb_protocol::Operation;

fn enlisting(server: &fb_testing::MockServer) -> String {
    format!("{};enlist=true", server.descriptor("main.fdb"))
}

#[tokio::test]
async fn test_enlist_without_ambient_fails_before_connecting() {
    let server = common::server(&["main.fdb"]).await;
    let conn = Connection::new(&enlisting(&server)).unwrap();

    let err = conn.open().await.unwrap_err();
    assert!(matches!(err, Error::InvalidOperation(_)));
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(server.accepted_connections(), 0);
}

#[tokio::test]
async fn test_open_enlists_with_ambient_isolation() {
    let server = common::server(&["main.fdb"]).await;
    let conn = Connection::new(&enlisting(&server)).unwrap();
    let ambient = Arc::new(TestAmbient {
        isolation: IsolationLevel::Serializable,
        ..TestAmbient::default()
    });
    conn.set_ambient_transaction(Some(ambient.clone()));

    conn.open().await.unwrap();
    assert_eq!(ambient.participant_count(), 1);
    assert_eq!(server.count(Operation::Transaction), 1);

    // the enlisted transaction occupies the connection
    let err = conn.begin_transaction().await.unwrap_err();
    assert!(matches!(err, Error::TransactionState(_)));

    let participant = ambient.participant(0);
    participant.prepare().await.unwrap();
    participant.commit().await.unwrap();
    assert_eq!(server.count(Operation::Prepare2), 1);
    assert_eq!(server.count(Operation::Commit), 1);

    let mut tx = conn.begin_transaction().await.unwrap();
    tx.commit().await.unwrap();
    conn.close().await;
}

#[tokio::test]
async fn test_refused_enlistment_rolls_back_and_closes() {
    let server = common::server(&["main.fdb"]).await;
    let conn = Connection::new(&enlisting(&server)).unwrap();
    conn.set_ambient_transaction(Some(Arc::new(TestAmbient::refusing())));

    let err = conn.open().await.unwrap_err();
    assert!(matches!(err, Error::Enlistment(_)));
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(server.count(Operation::Rollback), 1);

    // the session went back to the pool clean
    let options = ConnectionOptions::parse(&enlisting(&server)).unwrap();
    let status = pooling::pool_status(&options).unwrap();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.available, 1);
}

#[tokio::test]
async fn test_close_while_pending_keeps_session_until_resolution() {
    let server = common::server(&["main.fdb"]).await;
    let descriptor = enlisting(&server);
    let options = ConnectionOptions::parse(&descriptor).unwrap();
    let conn = Connection::new(&descriptor).unwrap();
    let ambient = Arc::new(TestAmbient::default());
    conn.set_ambient_transaction(Some(ambient.clone()));

    conn.open().await.unwrap();
    conn.close().await;
    assert_eq!(conn.state(), ConnectionState::Closed);

    // not rolled back, not returned
    assert_eq!(server.count(Operation::Rollback), 0);
    assert_eq!(pooling::pool_status(&options).unwrap().in_use, 1);

    ambient.participant(0).commit().await.unwrap();
    assert_eq!(server.count(Operation::Commit), 1);
    let status = pooling::pool_status(&options).unwrap();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.available, 1);
}

#[tokio::test]
async fn test_rollback_after_close_releases_session() {
    let server = common::server(&["main.fdb"]).await;
    let descriptor = enlisting(&server);
    let options = ConnectionOptions::parse(&descriptor).unwrap();
    let conn = Connection::new(&descriptor).unwrap();
    let ambient = Arc::new(TestAmbient::default());
    conn.set_ambient_transaction(Some(ambient.clone()));

    conn.open().await.unwrap();
    conn.close().await;
    ambient.participant(0).rollback().await.unwrap();

    assert_eq!(server.count(Operation::Rollback), 1);
    assert_eq!(pooling::pool_status(&options).unwrap().in_use, 0);
}

#[tokio::test]
async fn test_explicit_enlist_on_open_connection() {
    let server = common::server(&["main.fdb"]).await;
    let conn = Connection::new(&server.descriptor("main.fdb")).unwrap();
    conn.open().await.unwrap();

    let ambient = Arc::new(TestAmbient::default());
    conn.enlist_transaction(ambient.clone()).await.unwrap();
    assert_eq!(ambient.participant_count(), 1);

    let err = conn.enlist_transaction(ambient.clone()).await.unwrap_err();
    assert!(matches!(err, Error::Enlistment(_)));

    ambient.participant(0).commit().await.unwrap();
    conn.close().await;
    assert_eq!(server.count(Operation::Commit), 1);
    assert_eq!(server.count(Operation::Rollback), 0);
}
