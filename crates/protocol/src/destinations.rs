//! Broker destinations and the role → topic routing rule.

use crate::types::{PrincipalId, Role};

/// Path appended to the endpoint base URL for the WebSocket upgrade.
pub const WS_PATH: &str = "/ws-consultations";

/// Aggregate statistics broadcast, subscribed by every role.
pub const STATS_TOPIC: &str = "/topic/consultation/stats";

/// Application destination for the one-shot presence announcement.
pub const ANNOUNCE_DESTINATION: &str = "/app/consultation/subscribe";

pub fn consultant_topic(principal_id: PrincipalId) -> String {
    format!("/topic/consultant/{principal_id}")
}

pub fn user_topic(principal_id: PrincipalId) -> String {
    format!("/topic/user/{principal_id}")
}

/// The per-principal topic for a role. Consultants and admins share the
/// consultant inbox; every other role listens on the user topic.
pub fn role_topic(role: Role, principal_id: PrincipalId) -> String {
    if role.is_staff() {
        consultant_topic(principal_id)
    } else {
        user_topic(principal_id)
    }
}

/// Every destination a freshly connected session must subscribe to, in
/// subscription order.
pub fn subscription_topics(role: Role, principal_id: PrincipalId) -> Vec<String> {
    vec![role_topic(role, principal_id), STATS_TOPIC.to_string()]
}

/// Build the WebSocket URL from an HTTP(S) or WS(S) base URL.
pub fn websocket_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws_base}{WS_PATH}")
}
