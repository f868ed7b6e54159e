//! Consultline Protocol
//!
//! Shared types for the consultation notification channel: STOMP frames as
//! they travel over the WebSocket, the notification envelope pushed by the
//! broker, and the consultation records returned by the REST collaborator.

use uuid::Uuid;

// Re-exports
pub mod destinations;
pub mod notification;
pub mod stomp;
pub mod types;

pub use notification::{
    decode_notification, now_iso8601, parse_timestamp, NotificationDecodeError,
    NotificationEnvelope, NotificationType, PresenceAnnouncement,
};
pub use stomp::{decode_frames, Frame, FrameError, HeartBeat, StompCommand};
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
