//! Session callbacks and the event stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use consultline_protocol::NotificationEnvelope;

use crate::error::SessionError;
use crate::reconnect::ConnectionState;

/// Lifecycle callbacks. Every method defaults to a no-op so consumers
/// implement only what they care about.
///
/// Callbacks run on the session actor task and must not block.
pub trait SessionListener: Send + Sync {
    fn on_connect(&self) {}

    fn on_disconnect(&self) {}

    fn on_error(&self, _error: &SessionError) {}

    fn on_notification(&self, _notification: &NotificationEnvelope) {}

    fn on_state_change(&self, _state: ConnectionState) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Broadcast mirror of the listener callbacks for async consumers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    Error(Arc<SessionError>),
    Notification(Arc<NotificationEnvelope>),
    StateChanged(ConnectionState),
}

/// Registration-ordered listener list shared between the session handle and
/// its actor.
#[derive(Default)]
pub(crate) struct ListenerSet {
    next_id: AtomicU64,
    entries: RwLock<Vec<(ListenerId, Arc<dyn SessionListener>)>>,
}

impl ListenerSet {
    pub(crate) fn add(&self, listener: Arc<dyn SessionListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Invoke `f` on each listener in registration order. The list is
    /// snapshotted first so callbacks may add or remove listeners.
    pub(crate) fn each(&self, mut f: impl FnMut(&dyn SessionListener)) {
        let snapshot: Vec<Arc<dyn SessionListener>> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            f(listener.as_ref());
        }
    }
}
