//! Inbound MESSAGE frames → notification envelopes → listeners.

use std::sync::Arc;

use consultline_protocol::{decode_notification, new_id, Frame, NotificationEnvelope};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::listener::{ListenerSet, SessionEvent};

const PREVIEW_CHARS: usize = 120;

/// Decode one MESSAGE body and deliver it. Undecodable payloads are logged
/// and dropped; they never reach `on_error`.
pub(crate) fn dispatch(
    session_id: &str,
    frame: &Frame,
    listeners: &ListenerSet,
    events: &broadcast::Sender<SessionEvent>,
) -> Option<Arc<NotificationEnvelope>> {
    let mut envelope = match decode_notification(&frame.body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(
                component = "decoder",
                event = "decoder.frame.dropped",
                session_id = %session_id,
                destination = frame.get("destination").unwrap_or(""),
                error = %e,
                payload = %preview(&frame.body),
                "Dropping undecodable notification"
            );
            return None;
        }
    };
    envelope.id = Some(new_id());

    debug!(
        component = "decoder",
        event = "decoder.notification.received",
        session_id = %session_id,
        kind = envelope.kind.as_str(),
        destination = frame.get("destination").unwrap_or(""),
        "Notification received"
    );

    let envelope = Arc::new(envelope);
    listeners.each(|listener| listener.on_notification(&envelope));
    let _ = events.send(SessionEvent::Notification(envelope.clone()));
    Some(envelope)
}

fn preview(body: &str) -> String {
    let mut out: String = body.chars().take(PREVIEW_CHARS).collect();
    if body.chars().count() > PREVIEW_CHARS {
        out.push('…');
    }
    out
}
