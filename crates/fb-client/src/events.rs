//! State-change and warning notifications.
//!
//! Subscribers register callbacks on a [`Connection`](crate::Connection) and
//! get back a [`SubscriptionId`] that removes them again. Any number of
//! subscribers, including none, is supported.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::state::ConnectionState;

/// A lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    /// State before the transition.
    pub previous: ConnectionState,
    /// State after the transition.
    pub current: ConnectionState,
}

/// A non-fatal message sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerWarning {
    /// Warning code.
    pub code: u32,
    /// Rendered message.
    pub message: String,
}

/// Token returned by a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type StateCallback = Arc<dyn Fn(StateChange) + Send + Sync>;
type WarningCallback = Arc<dyn Fn(&ServerWarning) + Send + Sync>;

/// Callback lists of one connection.
///
/// Callbacks are cloned out of the lock before they run, so a callback may
/// subscribe or unsubscribe without deadlocking.
#[derive(Default)]
pub(crate) struct EventHub {
    next_id: AtomicU64,
    state: Mutex<Vec<(SubscriptionId, StateCallback)>>,
    warnings: Mutex<Vec<(SubscriptionId, WarningCallback)>>,
}

impl EventHub {
    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn on_state_change(
        &self,
        callback: impl Fn(StateChange) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id();
        self.state.lock().push((id, Arc::new(callback)));
        id
    }

    pub(crate) fn on_warning(
        &self,
        callback: impl Fn(&ServerWarning) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id();
        self.warnings.lock().push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscription of either kind. Returns `false` if unknown.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut removed = false;
        self.state.lock().retain(|(sid, _)| {
            let keep = *sid != id;
            removed |= !keep;
            keep
        });
        self.warnings.lock().retain(|(sid, _)| {
            let keep = *sid != id;
            removed |= !keep;
            keep
        });
        removed
    }

    pub(crate) fn emit_state(&self, previous: ConnectionState, current: ConnectionState) {
        let callbacks: Vec<StateCallback> =
            self.state.lock().iter().map(|(_, cb)| cb.clone()).collect();
        let change = StateChange { previous, current };
        for callback in callbacks {
            callback(change);
        }
    }

    pub(crate) fn emit_warning(&self, warning: &ServerWarning) {
        let callbacks: Vec<WarningCallback> = self
            .warnings
            .lock()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            callback(warning);
        }
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("state_subscribers", &self.state.lock().len())
            .field("warning_subscribers", &self.warnings.lock().len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_state_callbacks_receive_transition() {
        let hub = EventHub::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        hub.on_state_change(move |change| sink.lock().push(change));

        hub.emit_state(ConnectionState::Closed, ConnectionState::Connecting);
        hub.emit_state(ConnectionState::Connecting, ConnectionState::Open);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].previous, ConnectionState::Connecting);
        assert_eq!(seen[1].current, ConnectionState::Open);
    }

    #[test]
    fn test_unsubscribe() {
        let hub = EventHub::default();
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        let id = hub.on_warning(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let warning = ServerWarning {
            code: 1,
            message: "careful".into(),
        };
        hub.emit_warning(&warning);
        assert!(hub.unsubscribe(id));
        hub.emit_warning(&warning);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!hub.unsubscribe(id));
    }

    #[test]
    fn test_no_subscribers() {
        let hub = EventHub::default();
        hub.emit_state(ConnectionState::Open, ConnectionState::Closed);
    }
}
