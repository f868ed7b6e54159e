//! Notification envelope pushed by the broker

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{Consultation, PrincipalId, Role};

/// Notification kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    NewConsultation,
    ConsultationAnswered,
    ConsultationUpdated,
    ConsultationCancelled,
    StatsUpdate,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::NewConsultation => "NEW_CONSULTATION",
            NotificationType::ConsultationAnswered => "CONSULTATION_ANSWERED",
            NotificationType::ConsultationUpdated => "CONSULTATION_UPDATED",
            NotificationType::ConsultationCancelled => "CONSULTATION_CANCELLED",
            NotificationType::StatsUpdate => "STATS_UPDATE",
        }
    }

    /// Kinds whose `data` is a consultation record
    pub fn carries_consultation(&self) -> bool {
        !matches!(self, NotificationType::StatsUpdate)
    }
}

#[derive(Debug, Error)]
pub enum NotificationDecodeError {
    #[error("invalid notification payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("notification timestamp is not ISO-8601: {0}")]
    Timestamp(String),
}

/// A decoded notification. `id` and `read` are assigned on the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub message: String,
    #[serde(default)]
    pub data: Value,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub read: bool,
}

impl NotificationEnvelope {
    pub fn new(kind: NotificationType, message: impl Into<String>, data: Value) -> Self {
        Self {
            kind,
            message: message.into(),
            data,
            timestamp: now_iso8601(),
            id: None,
            read: false,
        }
    }

    /// The consultation carried in `data`, if this kind has one and it parses.
    pub fn consultation(&self) -> Option<Consultation> {
        if !self.kind.carries_consultation() {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }

    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.timestamp)
    }
}

/// Parse an inbound frame body into an envelope.
pub fn decode_notification(body: &str) -> Result<NotificationEnvelope, NotificationDecodeError> {
    let mut envelope: NotificationEnvelope = serde_json::from_str(body)?;
    if parse_timestamp(&envelope.timestamp).is_none() {
        return Err(NotificationDecodeError::Timestamp(envelope.timestamp));
    }
    // Client-side fields never come from the wire.
    envelope.id = None;
    envelope.read = false;
    Ok(envelope)
}

/// One-shot "I am here" frame sent after every successful connect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceAnnouncement {
    pub user_id: PrincipalId,
    pub role: Role,
    pub timestamp: String,
}

impl PresenceAnnouncement {
    pub fn now(user_id: PrincipalId, role: Role) -> Self {
        Self {
            user_id,
            role,
            timestamp: now_iso8601(),
        }
    }
}

/// Accepts RFC 3339 as well as offset-less local date-times (treated as UTC).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
