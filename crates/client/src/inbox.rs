//! Bounded, most-recent-first notification inbox with an unread counter.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use consultline_protocol::{new_id, NotificationEnvelope};
use tokio::sync::watch;

use crate::listener::SessionListener;

pub const INBOX_CAPACITY: usize = 50;

/// The unread counter is kept separately from the entries: evicting an unread
/// entry does not decrement it, so it can exceed `entries().len()`.
#[derive(Debug, Clone)]
pub struct Inbox {
    entries: VecDeque<NotificationEnvelope>,
    unread_count: usize,
    capacity: usize,
}

impl Default for Inbox {
    fn default() -> Self {
        Self::with_capacity(INBOX_CAPACITY)
    }
}

impl Inbox {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            unread_count: 0,
            capacity,
        }
    }

    /// Prepend as unread. Entries past capacity fall off the tail.
    pub fn push(&mut self, mut notification: NotificationEnvelope) {
        if notification.id.is_none() {
            notification.id = Some(new_id());
        }
        notification.read = false;
        self.entries.push_front(notification);
        self.entries.truncate(self.capacity);
        self.unread_count += 1;
    }

    /// `Some(id)` flips that entry if it is unread; `None` flips everything
    /// and resets the counter. Unknown or already-read ids are a no-op.
    pub fn mark_read(&mut self, id: Option<&str>) {
        match id {
            Some(id) => {
                let unread = self
                    .entries
                    .iter_mut()
                    .find(|entry| entry.id.as_deref() == Some(id) && !entry.read);
                if let Some(entry) = unread {
                    entry.read = true;
                    self.unread_count = self.unread_count.saturating_sub(1);
                }
            }
            None => {
                for entry in &mut self.entries {
                    entry.read = true;
                }
                self.unread_count = 0;
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.unread_count = 0;
    }

    pub fn unread_count(&self) -> usize {
        self.unread_count
    }

    pub fn entries(&self) -> impl Iterator<Item = &NotificationEnvelope> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&NotificationEnvelope> {
        self.entries.iter().find(|entry| entry.id.as_deref() == Some(id))
    }

    pub fn summary(&self) -> InboxSummary {
        InboxSummary {
            unread_count: self.unread_count,
            len: self.entries.len(),
            latest_id: self.entries.front().and_then(|entry| entry.id.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboxSummary {
    pub unread_count: usize,
    pub len: usize,
    pub latest_id: Option<String>,
}

/// Thread-safe inbox that fills itself from a session.
#[derive(Clone)]
pub struct SharedInbox {
    inner: Arc<SharedInner>,
}

struct SharedInner {
    inbox: Mutex<Inbox>,
    summary: watch::Sender<InboxSummary>,
}

impl Default for SharedInbox {
    fn default() -> Self {
        Self::new(Inbox::default())
    }
}

impl SharedInbox {
    pub fn new(inbox: Inbox) -> Self {
        let (summary, _) = watch::channel(inbox.summary());
        Self {
            inner: Arc::new(SharedInner {
                inbox: Mutex::new(inbox),
                summary,
            }),
        }
    }

    pub fn push(&self, notification: NotificationEnvelope) {
        self.mutate(|inbox| inbox.push(notification));
    }

    pub fn mark_read(&self, id: Option<&str>) {
        self.mutate(|inbox| inbox.mark_read(id));
    }

    pub fn clear(&self) {
        self.mutate(Inbox::clear);
    }

    pub fn unread_count(&self) -> usize {
        self.lock().unread_count()
    }

    /// Copy of the current entries, newest first.
    pub fn entries(&self) -> Vec<NotificationEnvelope> {
        self.lock().entries().cloned().collect()
    }

    pub fn summary(&self) -> InboxSummary {
        self.inner.summary.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<InboxSummary> {
        self.inner.summary.subscribe()
    }

    fn mutate(&self, f: impl FnOnce(&mut Inbox)) {
        let summary = {
            let mut inbox = self.lock();
            f(&mut inbox);
            inbox.summary()
        };
        self.inner.summary.send_replace(summary);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inbox> {
        self.inner.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionListener for SharedInbox {
    fn on_notification(&self, notification: &NotificationEnvelope) {
        self.push(notification.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consultline_protocol::NotificationType;
    use serde_json::json;

    fn note(n: usize) -> NotificationEnvelope {
        NotificationEnvelope::new(NotificationType::NewConsultation, format!("n{n}"), json!({}))
    }

    #[test]
    fn newest_first_and_counts_pushes() {
        let mut inbox = Inbox::default();
        for n in 0..3 {
            inbox.push(note(n));
        }
        let messages: Vec<_> = inbox.entries().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["n2", "n1", "n0"]);
        assert_eq!(inbox.unread_count(), 3);
        assert!(inbox.entries().all(|e| !e.read && e.id.is_some()));
    }

    #[test]
    fn push_resets_read_flag_and_keeps_existing_id() {
        let mut inbox = Inbox::default();
        let mut n = note(0);
        n.read = true;
        n.id = Some("given".to_string());
        inbox.push(n);
        let entry = inbox.get("given").unwrap();
        assert!(!entry.read);
    }

    #[test]
    fn mark_one_read_twice_decrements_once() {
        let mut inbox = Inbox::default();
        inbox.push(note(0));
        inbox.push(note(1));
        let id = inbox.entries().next().unwrap().id.clone().unwrap();

        inbox.mark_read(Some(&id));
        assert_eq!(inbox.unread_count(), 1);
        inbox.mark_read(Some(&id));
        assert_eq!(inbox.unread_count(), 1);

        inbox.mark_read(Some("missing"));
        assert_eq!(inbox.unread_count(), 1);
    }

    #[test]
    fn mark_all_read_resets_counter() {
        let mut inbox = Inbox::default();
        for n in 0..4 {
            inbox.push(note(n));
        }
        inbox.mark_read(None);
        assert_eq!(inbox.unread_count(), 0);
        assert!(inbox.entries().all(|e| e.read));
    }

    #[test]
    fn capacity_is_bounded_and_counter_survives_eviction() {
        let mut inbox = Inbox::default();
        for n in 0..(INBOX_CAPACITY + 10) {
            inbox.push(note(n));
        }
        assert_eq!(inbox.len(), INBOX_CAPACITY);
        assert_eq!(inbox.unread_count(), INBOX_CAPACITY + 10);
        assert_eq!(
            inbox.entries().next().unwrap().message,
            format!("n{}", INBOX_CAPACITY + 9)
        );
        assert_eq!(inbox.entries().last().unwrap().message, "n10");

        inbox.mark_read(None);
        assert_eq!(inbox.unread_count(), 0);
    }

    #[test]
    fn clear_empties_everything() {
        let mut inbox = Inbox::default();
        inbox.push(note(0));
        inbox.clear();
        assert!(inbox.is_empty());
        assert_eq!(inbox.unread_count(), 0);
    }

    #[test]
    fn shared_inbox_publishes_summaries() {
        let shared = SharedInbox::default();
        let rx = shared.watch();

        shared.on_notification(&note(0));
        shared.on_notification(&note(1));
        assert_eq!(rx.borrow().unread_count, 2);
        assert_eq!(rx.borrow().len, 2);

        let latest = shared.entries()[0].id.clone();
        assert_eq!(rx.borrow().latest_id, latest);

        shared.mark_read(latest.as_deref());
        assert_eq!(shared.summary().unread_count, 1);
        shared.clear();
        assert_eq!(shared.summary(), InboxSummary::default());
    }
}
