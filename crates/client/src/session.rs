//! Session handle: the public face of one transport session.
//!
//! `Session` is cheap to clone. All clones talk to the same actor task, which
//! exclusively owns the link, the reconnection state, and the timers.
//! Operations never fail synchronously; failures reach listeners.

use std::sync::Arc;

use arc_swap::ArcSwap;
use consultline_protocol::{new_id, Principal};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::warn;

use crate::config::{SessionConfig, SessionConfigUpdate};
use crate::listener::{ListenerId, ListenerSet, SessionEvent, SessionListener};
use crate::reconnect::ConnectionState;
use crate::session_actor::SessionActor;
use crate::session_command::SessionCommand;
use crate::transport::{Transport, WebSocketTransport};

const EVENT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: String,
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    config: Arc<ArcSwap<SessionConfig>>,
    listeners: Arc<ListenerSet>,
    events: broadcast::Sender<SessionEvent>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl Session {
    /// Create a session over WebSocket. Must be called inside a tokio runtime.
    /// The session starts `Idle`; call [`Session::connect`].
    pub fn new(config: SessionConfig) -> Self {
        Self::with_transport(config, Arc::new(WebSocketTransport))
    }

    pub fn with_transport(mut config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        let id = new_id();

        let listeners = Arc::new(ListenerSet::default());
        for listener in config.listeners.drain(..) {
            listeners.add(listener);
        }

        let config = Arc::new(ArcSwap::from_pointee(config));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let actor = SessionActor::new(
            id.clone(),
            transport,
            config.clone(),
            listeners.clone(),
            events.clone(),
            state_tx,
        );
        tokio::spawn(actor.run(command_rx));

        Self {
            inner: Arc::new(SessionInner {
                id,
                command_tx,
                config,
                listeners,
                events,
                state_rx,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Idempotent: a no-op while connecting, connected, or waiting to retry.
    pub fn connect(&self) {
        self.send(SessionCommand::Connect);
    }

    /// Deterministic teardown. Cancels any pending retry and in-flight
    /// attempt; no automatic reconnect follows.
    pub fn disconnect(&self) {
        self.send(SessionCommand::Disconnect);
    }

    /// Drop everything and start over with a fresh retry budget. The only way
    /// out of [`ConnectionState::Failed`] besides `connect()`.
    pub fn reconnect(&self) {
        self.send(SessionCommand::Reconnect);
    }

    /// Merge a partial config. A changed endpoint, principal or credential on
    /// a connected session forces one disconnect followed by one delayed
    /// connect.
    pub fn update_config(&self, update: SessionConfigUpdate) {
        let mut link_changed = false;
        self.inner.config.rcu(|current| {
            let mut next = SessionConfig::clone(current);
            link_changed = next.apply(update.clone());
            next
        });
        self.send(SessionCommand::ConfigUpdated { link_changed });
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Lock-free read of the current config.
    pub fn config(&self) -> Arc<SessionConfig> {
        self.inner.config.load_full()
    }

    pub fn principal(&self) -> Principal {
        self.inner.config.load().principal
    }

    /// Close the link and stop the actor. Resolves once the link is closed.
    pub async fn shutdown(&self) {
        let (reply, done) = oneshot::channel();
        if self.inner.command_tx.send(SessionCommand::Shutdown { reply }).is_err() {
            return;
        }
        let _ = done.await;
    }

    /// True when both handles refer to the same session.
    pub fn is_same(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn send(&self, command: SessionCommand) {
        if self.inner.command_tx.send(command).is_err() {
            warn!(
                component = "session",
                event = "session.command.dropped",
                session_id = %self.inner.id,
                "Session actor stopped, command dropped"
            );
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}
