//! Shared helpers for fb-client integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Arc;

use fb_client::{AmbientTransaction, EnlistmentParticipant, Error, IsolationLevel, Result};
use fb_testing::MockServer;
use parking_lot::Mutex;

/// Install a test-friendly subscriber once per binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Start a mock server with `databases` attachable.
pub async fn server(databases: &[&str]) -> MockServer {
    init_tracing();
    let server = MockServer::start().await.unwrap();
    for database in databases {
        server.add_database(database);
    }
    server
}

/// Coordinator stand-in that records its participants.
#[derive(Default)]
pub struct TestAmbient {
    pub isolation: IsolationLevel,
    pub refuse: bool,
    pub participants: Mutex<Vec<Arc<dyn EnlistmentParticipant>>>,
}

impl TestAmbient {
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn participant(&self, index: usize) -> Arc<dyn EnlistmentParticipant> {
        self.participants.lock()[index].clone()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.lock().len()
    }
}

impl AmbientTransaction for TestAmbient {
    fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    fn enlist(&self, participant: Arc<dyn EnlistmentParticipant>) -> Result<()> {
        if self.refuse {
            return Err(Error::Enlistment("coordinator refused".into()));
        }
        self.participants.lock().push(participant);
        Ok(())
    }
}
