//! Session and transport errors.
//!
//! Nothing here is returned synchronously from session operations; errors
//! reach callers through `SessionListener::on_error` and the event channel.

use std::time::Duration;

use consultline_protocol::Frame;
use thiserror::Error;

/// Failures of the underlying message connection
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid connection request for {url}: {reason}")]
    InvalidRequest { url: String, reason: String },

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),
}

/// Errors reported to session listeners
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Broker-level rejection (STOMP `ERROR` frame), including refused
    /// credentials.
    #[error("broker error: {message}")]
    Protocol {
        message: String,
        details: Option<String>,
    },

    #[error("malformed frame: {0}")]
    Frame(String),

    #[error("broker closed the connection before CONNECTED")]
    HandshakeClosed,

    #[error("no CONNECTED frame within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("unexpected {0} frame during handshake")]
    UnexpectedFrame(String),

    #[error("no heart-beat from broker for {0:?}")]
    HeartbeatTimeout(Duration),

    #[error("broker closed the connection")]
    Closed,
}

impl SessionError {
    pub(crate) fn from_error_frame(frame: &Frame) -> Self {
        let message = frame
            .get("message")
            .map(str::to_string)
            .unwrap_or_else(|| "broker sent ERROR".to_string());
        let details = (!frame.body.trim().is_empty()).then(|| frame.body.clone());
        SessionError::Protocol { message, details }
    }

    /// Transport-level failures as opposed to broker/protocol rejections.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SessionError::Transport(_)
                | SessionError::HandshakeClosed
                | SessionError::HeartbeatTimeout(_)
                | SessionError::Closed
        )
    }
}
