//! Sender-side view of one conversation with one consultant.

use std::sync::Arc;

use consultline_protocol::{
    Consultation, ConsultationEdit, ConsultationId, NewConsultation, PrincipalId,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::{next_batch, Mount, RefreshRequest};
use crate::api::{ApiError, ConsultationApi, SenderQuery, DEFAULT_PAGE_SIZE};
use crate::config::SessionConfig;
use crate::lifecycle::{LifecycleAction, LifecyclePolicy};
use crate::registry::SessionRegistry;
use crate::session::Session;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadSnapshot {
    /// Newest first, as returned by the collaborator.
    pub consultations: Vec<Consultation>,
    pub pages_loaded: u32,
    pub has_more: bool,
    /// Bumped on every completed refetch, successful or not.
    pub revision: u64,
    pub last_error: Option<String>,
}

impl ThreadSnapshot {
    pub fn find(&self, id: ConsultationId) -> Option<&Consultation> {
        self.consultations.iter().find(|c| c.id == id)
    }
}

pub struct ThreadView {
    mount: Mount,
    api: Arc<dyn ConsultationApi>,
    sender_id: PrincipalId,
    consultant_id: PrincipalId,
    policy: LifecyclePolicy,
    snapshot: watch::Receiver<ThreadSnapshot>,
}

impl ThreadView {
    /// Attach to the registry's session for `config.principal` (the sender)
    /// and load the first page of the conversation with `consultant_id`.
    pub async fn mount(
        registry: &SessionRegistry,
        config: SessionConfig,
        api: Arc<dyn ConsultationApi>,
        consultant_id: PrincipalId,
        policy: LifecyclePolicy,
    ) -> Self {
        let session = registry.attach(config).await;
        Self::with_session(session, api, consultant_id, policy).await
    }

    pub async fn with_session(
        session: Session,
        api: Arc<dyn ConsultationApi>,
        consultant_id: PrincipalId,
        policy: LifecyclePolicy,
    ) -> Self {
        let sender_id = session.principal().id;
        let (snapshot_tx, snapshot) = watch::channel(ThreadSnapshot {
            pages_loaded: 1,
            ..ThreadSnapshot::default()
        });

        let fetch_api = api.clone();
        let mount = Mount::new(
            session,
            move |notification| {
                notification
                    .consultation()
                    .is_some_and(|c| c.is_between(sender_id, consultant_id))
            },
            move |rx| refresh_loop(fetch_api, sender_id, consultant_id, snapshot_tx, rx),
        );

        let view = Self {
            mount,
            api,
            sender_id,
            consultant_id,
            policy,
            snapshot,
        };
        view.refresh().await;
        view
    }

    pub fn session(&self) -> &Session {
        self.mount.session()
    }

    pub fn sender_id(&self) -> PrincipalId {
        self.sender_id
    }

    pub fn consultant_id(&self) -> PrincipalId {
        self.consultant_id
    }

    pub fn snapshot(&self) -> ThreadSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ThreadSnapshot> {
        self.snapshot.clone()
    }

    /// Refetch every loaded page.
    pub async fn refresh(&self) -> ThreadSnapshot {
        self.mount.refresh(false).await;
        self.snapshot()
    }

    /// Load one more page.
    pub async fn load_more(&self) -> ThreadSnapshot {
        self.mount.refresh(true).await;
        self.snapshot()
    }

    /// Send a new question to this view's consultant.
    pub async fn ask(
        &self,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<Consultation, ApiError> {
        let created = self
            .api
            .create_consultation(NewConsultation {
                sender_id: self.sender_id,
                consultant_id: self.consultant_id,
                title: title.into(),
                content: content.into(),
            })
            .await?;
        self.refresh().await;
        Ok(created)
    }

    /// Edit one of our questions, if its status still allows it.
    pub async fn edit(
        &self,
        id: ConsultationId,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<Consultation, ApiError> {
        if let Some(current) = self.snapshot.borrow().find(id) {
            self.policy
                .check_actor(current, LifecycleAction::SenderEdit, self.sender_id)?;
        }
        let updated = self
            .api
            .update_consultation(
                id,
                ConsultationEdit {
                    title: title.into(),
                    content: content.into(),
                },
            )
            .await?;
        self.refresh().await;
        Ok(updated)
    }
}

async fn refresh_loop(
    api: Arc<dyn ConsultationApi>,
    sender_id: PrincipalId,
    consultant_id: PrincipalId,
    snapshot: watch::Sender<ThreadSnapshot>,
    mut rx: mpsc::UnboundedReceiver<RefreshRequest>,
) {
    while let Some(batch) = next_batch(&mut rx).await {
        let pages = snapshot.borrow().pages_loaded + batch.load_more;
        let fetched = fetch_pages(api.as_ref(), sender_id, consultant_id, pages).await;

        snapshot.send_modify(|current| {
            current.revision += 1;
            match fetched {
                Ok((consultations, has_more)) => {
                    current.consultations = consultations;
                    current.pages_loaded = pages;
                    current.has_more = has_more;
                    current.last_error = None;
                }
                Err(e) => {
                    warn!(
                        component = "thread_view",
                        event = "thread_view.refresh.failed",
                        sender_id,
                        consultant_id,
                        error = %e,
                        "Refreshing conversation failed"
                    );
                    current.last_error = Some(e.to_string());
                }
            }
        });
        debug!(
            component = "thread_view",
            event = "thread_view.refreshed",
            sender_id,
            consultant_id,
            pushes = batch.pushes,
            "Conversation refreshed"
        );
        batch.finish();
    }
}

async fn fetch_pages(
    api: &dyn ConsultationApi,
    sender_id: PrincipalId,
    consultant_id: PrincipalId,
    pages: u32,
) -> Result<(Vec<Consultation>, bool), ApiError> {
    let mut consultations = Vec::new();
    let mut has_more = false;
    for page in 0..pages {
        let query = SenderQuery {
            sender_id,
            consultant_id: Some(consultant_id),
            page,
            size: DEFAULT_PAGE_SIZE,
        };
        let result = api.consultations_by_sender(query).await?;
        consultations.extend(result.content.iter().cloned());
        has_more = !result.is_last();
        if !has_more {
            break;
        }
    }
    Ok((consultations, has_more))
}

#[cfg(test)]
mod tests {
    use super::*;
    use consultline_protocol::{AnswerSubmission, ConsultationStatus, Role};

    use crate::api::ApiError;
    use crate::lifecycle::LifecycleError;
    use crate::testing::{eventually, test_config, MemoryBroker, MemoryConsultationApi};

    fn answer(text: &str) -> AnswerSubmission {
        AnswerSubmission {
            answer: text.to_string(),
        }
    }

    async fn mounted(api: &Arc<MemoryConsultationApi>, registry: &SessionRegistry) -> ThreadView {
        let view = ThreadView::mount(
            registry,
            test_config(3, Role::EndUser, None),
            api.clone(),
            9,
            LifecyclePolicy::default(),
        )
        .await;
        eventually(|| view.session().is_connected()).await;
        view
    }

    #[tokio::test(start_paused = true)]
    async fn ask_creates_and_refreshes_eagerly() {
        let broker = MemoryBroker::new();
        let api = Arc::new(MemoryConsultationApi::new());
        let registry = SessionRegistry::new(Arc::new(broker.clone()));
        let view = mounted(&api, &registry).await;
        assert!(view.snapshot().consultations.is_empty());

        let created = view.ask("Visa", "Do I need one?").await.unwrap();

        let snapshot = view.snapshot();
        assert_eq!(snapshot.consultations.len(), 1);
        assert_eq!(snapshot.consultations[0].id, created.id);
        assert_eq!(snapshot.consultations[0].status, ConsultationStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn relevant_push_triggers_refetch() {
        let broker = MemoryBroker::new();
        let api = Arc::new(MemoryConsultationApi::with_broker(broker.clone()));
        let registry = SessionRegistry::new(Arc::new(broker.clone()));
        let view = mounted(&api, &registry).await;
        let created = view.ask("Visa", "Do I need one?").await.unwrap();
        let before = view.snapshot().revision;

        api.submit_answer(created.id, answer("Yes")).await.unwrap();

        eventually(|| view.snapshot().revision > before).await;
        let snapshot = view.snapshot();
        assert_eq!(snapshot.consultations[0].status, ConsultationStatus::Answered);
        assert_eq!(snapshot.consultations[0].answer.as_deref(), Some("Yes"));
    }

    #[tokio::test(start_paused = true)]
    async fn irrelevant_push_is_ignored() {
        let broker = MemoryBroker::new();
        let api = Arc::new(MemoryConsultationApi::new());
        let registry = SessionRegistry::new(Arc::new(broker.clone()));
        let view = mounted(&api, &registry).await;
        let fetches = api.calls("consultations_by_sender");

        // Another consultant's thread.
        let other = crate::testing::consultation(77, 3, 10, ConsultationStatus::Answered);
        broker.publish(
            "/topic/user/3",
            &crate::testing::notification_body(
                "CONSULTATION_ANSWERED",
                serde_json::to_value(&other).unwrap(),
            ),
        );
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert_eq!(api.calls("consultations_by_sender"), fetches);
    }

    #[tokio::test(start_paused = true)]
    async fn edit_respects_lifecycle_policy() {
        let broker = MemoryBroker::new();
        let api = Arc::new(MemoryConsultationApi::new());
        let registry = SessionRegistry::new(Arc::new(broker.clone()));
        let view = mounted(&api, &registry).await;
        let created = view.ask("Visa", "Do I need one?").await.unwrap();

        let edited = view.edit(created.id, "Visa?", "Which visa?").await.unwrap();
        assert_eq!(edited.title, "Visa?");

        api.submit_answer(created.id, answer("Tourist")).await.unwrap();
        view.refresh().await;

        let error = view.edit(created.id, "Visa!", "...").await.unwrap_err();
        assert!(matches!(
            error,
            ApiError::Lifecycle(LifecycleError::NotAllowed { .. })
        ));
        assert_eq!(api.calls("update_consultation"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn load_more_pages_through_history() {
        let broker = MemoryBroker::new();
        let api = Arc::new(MemoryConsultationApi::new());
        for n in 0..(DEFAULT_PAGE_SIZE + 3) {
            api.seed(crate::testing::consultation(
                i64::from(n) + 1,
                3,
                9,
                ConsultationStatus::Pending,
            ));
        }
        let registry = SessionRegistry::new(Arc::new(broker.clone()));
        let view = mounted(&api, &registry).await;

        let first = view.snapshot();
        assert_eq!(first.consultations.len(), DEFAULT_PAGE_SIZE as usize);
        assert!(first.has_more);

        let second = view.load_more().await;
        assert_eq!(second.consultations.len(), DEFAULT_PAGE_SIZE as usize + 3);
        assert_eq!(second.pages_loaded, 2);
        assert!(!second.has_more);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_previous_data() {
        let broker = MemoryBroker::new();
        let api = Arc::new(MemoryConsultationApi::new());
        let registry = SessionRegistry::new(Arc::new(broker.clone()));
        let view = mounted(&api, &registry).await;
        view.ask("Visa", "Do I need one?").await.unwrap();

        api.fail_reads(true);
        let snapshot = view.refresh().await;

        assert_eq!(snapshot.consultations.len(), 1);
        assert!(snapshot.last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn unmount_removes_only_its_listener() {
        let broker = MemoryBroker::new();
        let api = Arc::new(MemoryConsultationApi::new());
        let registry = SessionRegistry::new(Arc::new(broker.clone()));
        let a = mounted(&api, &registry).await;
        let b = mounted(&api, &registry).await;
        let session = a.session().clone();
        assert!(session.is_same(b.session()));
        assert_eq!(session.listener_count(), 2);

        drop(a);
        assert_eq!(session.listener_count(), 1);
        assert!(session.is_connected());
        assert_eq!(broker.opens(), 1);

        drop(b);
        assert_eq!(session.listener_count(), 0);
        assert!(session.is_connected());
    }
}
