//! Consultant-side triage list: every sender's consultations, grouped.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use consultline_protocol::{
    group_by_sender, AnswerSubmission, CancelRequest, Consultation, ConsultationId,
    ConsultationStatus, GroupedConsultationThread, PrincipalId,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::{next_batch, Mount, RefreshRequest};
use crate::api::{ApiError, ConsultationApi};
use crate::config::SessionConfig;
use crate::lifecycle::{LifecycleAction, LifecyclePolicy};
use crate::registry::SessionRegistry;
use crate::session::Session;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriageSnapshot {
    pub threads: Vec<GroupedConsultationThread>,
    /// Keyword the threads were fetched with, if any.
    pub keyword: Option<String>,
    pub revision: u64,
    pub last_error: Option<String>,
}

impl TriageSnapshot {
    pub fn find(&self, id: ConsultationId) -> Option<&Consultation> {
        self.threads
            .iter()
            .flat_map(|thread| thread.consultations.iter())
            .find(|c| c.id == id)
    }

    pub fn pending_count(&self) -> usize {
        self.threads.iter().map(|t| t.pending_count).sum()
    }
}

pub struct TriageView {
    mount: Mount,
    api: Arc<dyn ConsultationApi>,
    consultant_id: PrincipalId,
    policy: LifecyclePolicy,
    keyword: Arc<ArcSwapOption<String>>,
    snapshot: watch::Receiver<TriageSnapshot>,
}

impl TriageView {
    /// Attach to the registry's session for `config.principal` (the
    /// consultant) and load the grouped list.
    pub async fn mount(
        registry: &SessionRegistry,
        config: SessionConfig,
        api: Arc<dyn ConsultationApi>,
        policy: LifecyclePolicy,
    ) -> Self {
        let session = registry.attach(config).await;
        Self::with_session(session, api, policy).await
    }

    pub async fn with_session(
        session: Session,
        api: Arc<dyn ConsultationApi>,
        policy: LifecyclePolicy,
    ) -> Self {
        let consultant_id = session.principal().id;
        let keyword = Arc::new(ArcSwapOption::empty());
        let (snapshot_tx, snapshot) = watch::channel(TriageSnapshot::default());

        let fetch_api = api.clone();
        let fetch_keyword = keyword.clone();
        let mount = Mount::new(
            session,
            move |notification| {
                notification
                    .consultation()
                    .is_some_and(|c| c.consultant.id == consultant_id)
            },
            move |rx| refresh_loop(fetch_api, consultant_id, fetch_keyword, snapshot_tx, rx),
        );

        let view = Self {
            mount,
            api,
            consultant_id,
            policy,
            keyword,
            snapshot,
        };
        view.refresh().await;
        view
    }

    pub fn session(&self) -> &Session {
        self.mount.session()
    }

    pub fn consultant_id(&self) -> PrincipalId {
        self.consultant_id
    }

    pub fn snapshot(&self) -> TriageSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<TriageSnapshot> {
        self.snapshot.clone()
    }

    pub async fn refresh(&self) -> TriageSnapshot {
        self.mount.refresh(false).await;
        self.snapshot()
    }

    /// Narrow the list to consultations matching `keyword`; `None` or a blank
    /// keyword restores the full grouped list.
    pub async fn search(&self, keyword: Option<String>) -> TriageSnapshot {
        let keyword = keyword
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        self.keyword.store(keyword.map(Arc::new));
        self.refresh().await
    }

    /// Answer a pending consultation, or edit the answer of an answered one.
    pub async fn answer(
        &self,
        id: ConsultationId,
        text: impl Into<String>,
    ) -> Result<Consultation, ApiError> {
        let current = self.snapshot.borrow().find(id).cloned();
        let edit = current
            .as_ref()
            .is_some_and(|c| c.status == ConsultationStatus::Answered);
        if let Some(current) = &current {
            let action = if edit {
                LifecycleAction::EditAnswer
            } else {
                LifecycleAction::Answer
            };
            self.policy
                .check_actor(current, action, self.consultant_id)?;
        }

        let submission = AnswerSubmission {
            answer: text.into(),
        };
        let updated = if edit {
            self.api.update_answer(id, submission).await?
        } else {
            self.api.submit_answer(id, submission).await?
        };
        self.refresh().await;
        Ok(updated)
    }

    pub async fn cancel(
        &self,
        id: ConsultationId,
        resolution_notes: Option<String>,
    ) -> Result<Consultation, ApiError> {
        let current = self.snapshot.borrow().find(id).cloned();
        if let Some(current) = &current {
            self.policy
                .check_actor(current, LifecycleAction::Cancel, self.consultant_id)?;
        }
        let cancelled = self
            .api
            .cancel_consultation(id, CancelRequest { resolution_notes })
            .await?;
        self.refresh().await;
        Ok(cancelled)
    }
}

async fn refresh_loop(
    api: Arc<dyn ConsultationApi>,
    consultant_id: PrincipalId,
    keyword: Arc<ArcSwapOption<String>>,
    snapshot: watch::Sender<TriageSnapshot>,
    mut rx: mpsc::UnboundedReceiver<RefreshRequest>,
) {
    while let Some(batch) = next_batch(&mut rx).await {
        let keyword = keyword.load_full().map(|k| k.as_str().to_string());
        let fetched = match &keyword {
            Some(keyword) => api
                .search_consultations(consultant_id, keyword)
                .await
                .map(group_by_sender),
            None => api.grouped_for_consultant(consultant_id).await,
        };

        snapshot.send_modify(|current| {
            current.revision += 1;
            match fetched {
                Ok(threads) => {
                    current.threads = threads;
                    current.keyword = keyword;
                    current.last_error = None;
                }
                Err(e) => {
                    warn!(
                        component = "triage_view",
                        event = "triage_view.refresh.failed",
                        consultant_id,
                        error = %e,
                        "Refreshing triage list failed"
                    );
                    current.last_error = Some(e.to_string());
                }
            }
        });
        debug!(
            component = "triage_view",
            event = "triage_view.refreshed",
            consultant_id,
            pushes = batch.pushes,
            "Triage list refreshed"
        );
        batch.finish();
    }
}
