//! Session configuration and partial updates.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use consultline_protocol::destinations::websocket_url;
use consultline_protocol::{HeartBeat, Principal};

use crate::listener::SessionListener;
use crate::reconnect::ReconnectPolicy;

/// Transport tuning knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    pub heartbeat_outgoing: Duration,
    pub heartbeat_incoming: Duration,
    pub reconnect: ReconnectPolicy,
    /// Pause between the forced disconnect and the reconnect after a
    /// credential change.
    pub credential_refresh_delay: Duration,
    /// `None` waits for `CONNECTED` indefinitely.
    pub handshake_timeout: Option<Duration>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            heartbeat_outgoing: Duration::from_secs(4),
            heartbeat_incoming: Duration::from_secs(4),
            reconnect: ReconnectPolicy::default(),
            credential_refresh_delay: Duration::from_secs(1),
            handshake_timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl TransportSettings {
    /// Our heart-beat offer for `CONNECT`.
    pub fn heart_beat(&self) -> HeartBeat {
        HeartBeat::new(self.heartbeat_outgoing, self.heartbeat_incoming)
    }
}

/// Everything a session needs to connect on behalf of one principal.
#[derive(Clone)]
pub struct SessionConfig {
    pub endpoint_base_url: String,
    pub principal: Principal,
    pub auth_token: Option<String>,
    pub settings: TransportSettings,
    /// Listeners registered before the first connect.
    pub listeners: Vec<Arc<dyn SessionListener>>,
}

impl SessionConfig {
    pub fn new(
        endpoint_base_url: impl Into<String>,
        principal: Principal,
        auth_token: Option<String>,
    ) -> Self {
        Self {
            endpoint_base_url: endpoint_base_url.into(),
            principal,
            auth_token,
            settings: TransportSettings::default(),
            listeners: Vec::new(),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn with_settings(mut self, settings: TransportSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn websocket_url(&self) -> String {
        websocket_url(&self.endpoint_base_url)
    }

    /// Merge a partial update. Returns true when the endpoint, principal or
    /// credential changed, since any of those invalidates an open link.
    pub fn apply(&mut self, update: SessionConfigUpdate) -> bool {
        let mut link_changed = false;
        if let Some(url) = update.endpoint_base_url {
            link_changed |= url != self.endpoint_base_url;
            self.endpoint_base_url = url;
        }
        if let Some(principal) = update.principal {
            link_changed |= principal != self.principal;
            self.principal = principal;
        }
        if let Some(settings) = update.settings {
            self.settings = settings;
        }
        if let Some(token) = update.auth_token {
            link_changed |= token != self.auth_token;
            self.auth_token = token;
        }
        link_changed
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("endpoint_base_url", &self.endpoint_base_url)
            .field("principal", &self.principal)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("settings", &self.settings)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Partial config. `auth_token: Some(None)` clears the credential.
#[derive(Debug, Clone, Default)]
pub struct SessionConfigUpdate {
    pub endpoint_base_url: Option<String>,
    pub principal: Option<Principal>,
    pub auth_token: Option<Option<String>>,
    pub settings: Option<TransportSettings>,
}

impl SessionConfigUpdate {
    pub fn auth_token(token: impl Into<String>) -> Self {
        Self {
            auth_token: Some(Some(token.into())),
            ..Self::default()
        }
    }
}
