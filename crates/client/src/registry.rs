//! Process-wide session registry: at most one live session at a time.
//!
//! Writes (`initialize`, `teardown`) are serialized by an async mutex; reads
//! are lock-free. While a replacement is in progress the slot reads as empty
//! and the phase is `Replacing`, so no caller ever observes two sessions.

use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwapOption;
use tokio::sync::{watch, Mutex};
use tracing::info;

use crate::config::SessionConfig;
use crate::reconnect::ConnectionState;
use crate::session::Session;
use crate::transport::{Transport, WebSocketTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryPhase {
    Vacant,
    Replacing,
    Occupied,
}

pub struct SessionRegistry {
    transport: Arc<dyn Transport>,
    slot: ArcSwapOption<Session>,
    phase: watch::Sender<RegistryPhase>,
    write_lock: Mutex<()>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(Arc::new(WebSocketTransport))
    }
}

impl SessionRegistry {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (phase, _) = watch::channel(RegistryPhase::Vacant);
        Self {
            transport,
            slot: ArcSwapOption::empty(),
            phase,
            write_lock: Mutex::new(()),
        }
    }

    /// Replace the registered session. The previous session is shut down and
    /// its link closed before the new one is created and connected.
    pub async fn initialize(&self, config: SessionConfig) -> Session {
        let _guard = self.write_lock.lock().await;
        self.replace(config).await
    }

    /// The registered session, whatever its connection state.
    pub fn get(&self) -> Option<Session> {
        self.slot.load_full().map(|session| Session::clone(&session))
    }

    /// The registered session if it is connected or working towards it.
    pub fn get_live(&self) -> Option<Session> {
        self.get().filter(|session| session.state().is_live())
    }

    /// Reuse a live session for the same principal, otherwise initialize a new
    /// one. Used by consumer surfaces on mount.
    pub async fn attach(&self, config: SessionConfig) -> Session {
        if let Some(session) = self.reusable(&config) {
            return session;
        }
        let _guard = self.write_lock.lock().await;
        if let Some(session) = self.reusable(&config) {
            return session;
        }
        self.replace(config).await
    }

    /// Shut down and clear the registered session, if any.
    pub async fn teardown(&self) {
        let _guard = self.write_lock.lock().await;
        let previous = self.slot.swap(None);
        if let Some(previous) = previous {
            self.phase.send_replace(RegistryPhase::Replacing);
            previous.shutdown().await;
            info!(
                component = "registry",
                event = "registry.session.removed",
                session_id = %previous.id(),
                "Session torn down"
            );
        }
        self.phase.send_replace(RegistryPhase::Vacant);
    }

    pub fn phase(&self) -> RegistryPhase {
        *self.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<RegistryPhase> {
        self.phase.subscribe()
    }

    fn reusable(&self, config: &SessionConfig) -> Option<Session> {
        self.get_live()
            .filter(|session| session.principal() == config.principal)
    }

    /// Caller holds `write_lock`.
    async fn replace(&self, config: SessionConfig) -> Session {
        self.phase.send_replace(RegistryPhase::Replacing);
        if let Some(previous) = self.slot.swap(None) {
            previous.shutdown().await;
            info!(
                component = "registry",
                event = "registry.session.replaced",
                session_id = %previous.id(),
                "Previous session shut down"
            );
        }

        let session = Session::with_transport(config, self.transport.clone());
        let mut state = session.watch_state();
        session.connect();
        // Publish only once the actor has left `Idle`, so a mount racing this
        // one sees a live session and reuses it.
        let _ = state.wait_for(|s| *s != ConnectionState::Idle).await;
        self.slot.store(Some(Arc::new(session.clone())));
        self.phase.send_replace(RegistryPhase::Occupied);

        info!(
            component = "registry",
            event = "registry.session.initialized",
            session_id = %session.id(),
            principal_id = session.principal().id,
            "Session registered"
        );
        session
    }
}

// ---------------------------------------------------------------------------
// Process-wide instance
// ---------------------------------------------------------------------------

static GLOBAL: OnceLock<SessionRegistry> = OnceLock::new();

/// The process-wide registry (WebSocket transport).
pub fn global() -> &'static SessionRegistry {
    GLOBAL.get_or_init(SessionRegistry::default)
}

pub async fn initialize_session(config: SessionConfig) -> Session {
    global().initialize(config).await
}

pub fn get_session() -> Option<Session> {
    global().get()
}

pub async fn disconnect_session() {
    global().teardown().await
}
