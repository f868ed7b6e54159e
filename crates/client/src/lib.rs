//! Consultline Client
//!
//! Real-time consultation notifications for one authenticated principal.
//!
//! A [`Session`] owns a single STOMP-over-WebSocket link, subscribes to the
//! principal's topics after every connect, decodes pushed notifications and
//! fans them out to registered [`SessionListener`]s. The
//! [`SessionRegistry`] keeps at most one live session per process; the
//! [`SharedInbox`] and [`ToastEmitter`] are listeners that UI surfaces attach.

pub mod adapters;
pub mod api;
pub mod config;
mod decoder;
pub mod error;
pub mod inbox;
pub mod lifecycle;
pub mod listener;
pub mod reconnect;
pub mod registry;
pub mod session;
mod session_actor;
mod session_command;
mod stomp_link;
pub mod toast;
pub mod transport;

#[cfg(test)]
mod testing;

pub use adapters::{ThreadSnapshot, ThreadView, TriageSnapshot, TriageView};
pub use api::{ApiError, ConsultationApi, HttpConsultationApi, SenderQuery};
pub use config::{SessionConfig, SessionConfigUpdate, TransportSettings};
pub use error::{SessionError, TransportError};
pub use inbox::{Inbox, InboxSummary, SharedInbox, INBOX_CAPACITY};
pub use lifecycle::{LifecycleAction, LifecycleError, LifecyclePolicy};
pub use listener::{ListenerId, SessionEvent, SessionListener};
pub use reconnect::{ConnectionState, ReconnectPolicy};
pub use registry::{
    disconnect_session, get_session, initialize_session, RegistryPhase, SessionRegistry,
};
pub use session::Session;
pub use toast::{LogToastSink, Toast, ToastEmitter, ToastLevel, ToastSink};
pub use transport::{ConnectRequest, Link, Transport, WebSocketTransport};

pub use consultline_protocol as protocol;
