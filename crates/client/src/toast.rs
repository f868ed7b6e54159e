//! Transient toasts raised for every notification, independent of the inbox.

use consultline_protocol::{NotificationEnvelope, NotificationType};
use tokio::sync::mpsc;
use tracing::info;

use crate::listener::SessionListener;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Success,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub level: ToastLevel,
    pub title: String,
    pub message: String,
    pub kind: NotificationType,
}

impl Toast {
    pub fn for_notification(notification: &NotificationEnvelope) -> Self {
        let (level, title) = match notification.kind {
            NotificationType::NewConsultation => (ToastLevel::Info, "New consultation"),
            NotificationType::ConsultationAnswered => (ToastLevel::Success, "Consultation answered"),
            NotificationType::ConsultationUpdated => (ToastLevel::Info, "Consultation updated"),
            NotificationType::ConsultationCancelled => {
                (ToastLevel::Warning, "Consultation cancelled")
            }
            NotificationType::StatsUpdate => (ToastLevel::Info, "Statistics updated"),
        };
        Self {
            level,
            title: title.to_string(),
            message: notification.message.clone(),
            kind: notification.kind,
        }
    }
}

/// Where toasts end up (a UI surface, a terminal, a channel).
pub trait ToastSink: Send + Sync {
    fn emit(&self, toast: Toast);
}

/// Default sink: writes toasts to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogToastSink;

impl ToastSink for LogToastSink {
    fn emit(&self, toast: Toast) {
        info!(
            component = "toast",
            event = "toast.emitted",
            level = ?toast.level,
            kind = toast.kind.as_str(),
            title = %toast.title,
            "{}",
            toast.message
        );
    }
}

impl ToastSink for mpsc::UnboundedSender<Toast> {
    fn emit(&self, toast: Toast) {
        let _ = self.send(toast);
    }
}

/// Listener that turns each notification into one toast.
pub struct ToastEmitter<S = LogToastSink> {
    sink: S,
}

impl<S: ToastSink> ToastEmitter<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }
}

impl Default for ToastEmitter<LogToastSink> {
    fn default() -> Self {
        Self::new(LogToastSink)
    }
}

impl<S: ToastSink> SessionListener for ToastEmitter<S> {
    fn on_notification(&self, notification: &NotificationEnvelope) {
        self.sink.emit(Toast::for_notification(notification));
    }
}
