//! Consumer surfaces built on the shared session.
//!
//! A surface mounts by reusing the registry's live session (or initializing
//! one), registers a filtering listener, and refetches from the collaborator
//! whenever a relevant push arrives. Unmounting removes only its own
//! listener; the session stays up for other surfaces.

mod thread_view;
mod triage_view;

pub use thread_view::{ThreadSnapshot, ThreadView};
pub use triage_view::{TriageSnapshot, TriageView};

use std::sync::Arc;

use consultline_protocol::NotificationEnvelope;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::listener::{ListenerId, SessionListener};
use crate::session::Session;

pub(crate) struct RefreshRequest {
    load_more: bool,
    done: Option<oneshot::Sender<()>>,
}

/// Requests folded together by the refresh task.
#[derive(Default)]
pub(crate) struct RefreshBatch {
    pub load_more: u32,
    pub pushes: usize,
    waiters: Vec<oneshot::Sender<()>>,
}

impl RefreshBatch {
    fn add(&mut self, request: RefreshRequest) {
        if request.load_more {
            self.load_more += 1;
        }
        match request.done {
            Some(done) => self.waiters.push(done),
            None => self.pushes += 1,
        }
    }

    pub(crate) fn finish(self) {
        for waiter in self.waiters {
            let _ = waiter.send(());
        }
    }
}

/// Wait for the next request and fold in everything already queued behind
/// it, so a burst of pushes costs one fetch.
pub(crate) async fn next_batch(rx: &mut mpsc::UnboundedReceiver<RefreshRequest>) -> Option<RefreshBatch> {
    let first = rx.recv().await?;
    let mut batch = RefreshBatch::default();
    batch.add(first);
    while let Ok(next) = rx.try_recv() {
        batch.add(next);
    }
    Some(batch)
}

/// Listener that asks for a refetch when a notification passes `filter`.
struct RefetchOn<F> {
    filter: F,
    trigger: mpsc::UnboundedSender<RefreshRequest>,
}

impl<F> SessionListener for RefetchOn<F>
where
    F: Fn(&NotificationEnvelope) -> bool + Send + Sync,
{
    fn on_notification(&self, notification: &NotificationEnvelope) {
        if (self.filter)(notification) {
            let _ = self.trigger.send(RefreshRequest {
                load_more: false,
                done: None,
            });
        }
    }
}

/// A surface's footprint on the session: its listener and refresh task.
pub(crate) struct Mount {
    session: Session,
    listener_id: ListenerId,
    trigger: mpsc::UnboundedSender<RefreshRequest>,
    task: JoinHandle<()>,
}

impl Mount {
    pub(crate) fn new<F, Fut>(
        session: Session,
        filter: F,
        refresher: impl FnOnce(mpsc::UnboundedReceiver<RefreshRequest>) -> Fut,
    ) -> Self
    where
        F: Fn(&NotificationEnvelope) -> bool + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (trigger, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(refresher(rx));
        let listener_id = session.add_listener(Arc::new(RefetchOn {
            filter,
            trigger: trigger.clone(),
        }));
        Self {
            session,
            listener_id,
            trigger,
            task,
        }
    }

    pub(crate) fn session(&self) -> &Session {
        &self.session
    }

    /// Refetch and wait until the new snapshot is published.
    pub(crate) async fn refresh(&self, load_more: bool) {
        let (done, finished) = oneshot::channel();
        let request = RefreshRequest {
            load_more,
            done: Some(done),
        };
        if self.trigger.send(request).is_ok() {
            let _ = finished.await;
        }
    }
}

impl Drop for Mount {
    fn drop(&mut self) {
        self.session.remove_listener(self.listener_id);
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn batches_fold_queued_requests() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for load_more in [false, true, false] {
            tx.send(RefreshRequest {
                load_more,
                done: None,
            })
            .unwrap();
        }
        let (done, finished) = oneshot::channel();
        tx.send(RefreshRequest {
            load_more: false,
            done: Some(done),
        })
        .unwrap();

        let batch = next_batch(&mut rx).await.unwrap();
        assert_eq!(batch.pushes, 3);
        assert_eq!(batch.load_more, 1);
        batch.finish();
        finished.await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
