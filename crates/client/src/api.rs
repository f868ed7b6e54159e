//! REST collaborator for consultation reads and mutations.
//!
//! Every endpoint answers `{code, message, result}`; `code == 1000` is
//! success. Consumer surfaces always refetch through this API after a push
//! or a mutation instead of patching from the push payload.

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use consultline_protocol::{
    AnswerSubmission, ApiEnvelope, CancelRequest, Consultation, ConsultationEdit, ConsultationId,
    GroupedConsultationThread, NewConsultation, Page, PrincipalId,
};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::lifecycle::LifecycleError;

pub const DEFAULT_PAGE_SIZE: u32 = 10;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("request rejected ({code}): {message}")]
    Rejected { code: i32, message: String },

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("response carried no result")]
    EmptyResult,

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// One page of a sender's consultations, optionally narrowed to a consultant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderQuery {
    pub sender_id: PrincipalId,
    pub consultant_id: Option<PrincipalId>,
    pub page: u32,
    pub size: u32,
}

impl SenderQuery {
    pub fn new(sender_id: PrincipalId) -> Self {
        Self {
            sender_id,
            consultant_id: None,
            page: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_consultant(mut self, consultant_id: PrincipalId) -> Self {
        self.consultant_id = Some(consultant_id);
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }
}

#[async_trait]
pub trait ConsultationApi: Send + Sync {
    async fn create_consultation(&self, request: NewConsultation) -> Result<Consultation, ApiError>;

    async fn update_consultation(
        &self,
        id: ConsultationId,
        edit: ConsultationEdit,
    ) -> Result<Consultation, ApiError>;

    async fn cancel_consultation(
        &self,
        id: ConsultationId,
        request: CancelRequest,
    ) -> Result<Consultation, ApiError>;

    async fn submit_answer(
        &self,
        id: ConsultationId,
        answer: AnswerSubmission,
    ) -> Result<Consultation, ApiError>;

    async fn update_answer(
        &self,
        id: ConsultationId,
        answer: AnswerSubmission,
    ) -> Result<Consultation, ApiError>;

    async fn consultations_by_sender(
        &self,
        query: SenderQuery,
    ) -> Result<Page<Consultation>, ApiError>;

    async fn grouped_for_consultant(
        &self,
        consultant_id: PrincipalId,
    ) -> Result<Vec<GroupedConsultationThread>, ApiError>;

    async fn search_consultations(
        &self,
        consultant_id: PrincipalId,
        keyword: &str,
    ) -> Result<Vec<Consultation>, ApiError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

pub struct HttpConsultationApi {
    client: reqwest::Client,
    base_url: String,
    token: ArcSwapOption<String>,
}

impl HttpConsultationApi {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, token)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: ArcSwapOption::from_pointee(token),
        }
    }

    /// Swap the bearer credential used by later requests.
    pub fn set_token(&self, token: Option<String>) {
        self.token.store(token.map(std::sync::Arc::new));
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match self.token.load_full() {
            Some(token) => builder.bearer_auth(token.as_str()),
            None => builder,
        }
    }

    async fn send_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.execute(self.request(method, path).json(body)).await
    }

    async fn execute<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        let url = response.url().path().to_string();
        let text = response.text().await?;

        debug!(
            component = "api",
            event = "api.response",
            path = %url,
            status = status.as_u16(),
            "Collaborator responded"
        );

        if !status.is_success() {
            let message = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&text)
                .ok()
                .and_then(|envelope| envelope.message)
                .unwrap_or(text);
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        unwrap_envelope(&text)
    }
}

/// Parse `{code, message, result}` and return `result` on success.
pub(crate) fn unwrap_envelope<T: DeserializeOwned>(text: &str) -> Result<T, ApiError> {
    let envelope: ApiEnvelope<T> =
        serde_json::from_str(text).map_err(|e| ApiError::Decode(e.to_string()))?;
    if !envelope.is_success() {
        return Err(ApiError::Rejected {
            code: envelope.code,
            message: envelope.message.unwrap_or_default(),
        });
    }
    envelope.result.ok_or(ApiError::EmptyResult)
}

#[async_trait]
impl ConsultationApi for HttpConsultationApi {
    async fn create_consultation(&self, request: NewConsultation) -> Result<Consultation, ApiError> {
        self.send_json(Method::POST, "/consultations", &request).await
    }

    async fn update_consultation(
        &self,
        id: ConsultationId,
        edit: ConsultationEdit,
    ) -> Result<Consultation, ApiError> {
        self.send_json(Method::PUT, &format!("/consultations/{id}"), &edit)
            .await
    }

    async fn cancel_consultation(
        &self,
        id: ConsultationId,
        request: CancelRequest,
    ) -> Result<Consultation, ApiError> {
        self.send_json(Method::PUT, &format!("/consultations/{id}/cancel"), &request)
            .await
    }

    async fn submit_answer(
        &self,
        id: ConsultationId,
        answer: AnswerSubmission,
    ) -> Result<Consultation, ApiError> {
        self.send_json(Method::POST, &format!("/consultations/{id}/answer"), &answer)
            .await
    }

    async fn update_answer(
        &self,
        id: ConsultationId,
        answer: AnswerSubmission,
    ) -> Result<Consultation, ApiError> {
        self.send_json(Method::PUT, &format!("/consultations/{id}/answer"), &answer)
            .await
    }

    async fn consultations_by_sender(
        &self,
        query: SenderQuery,
    ) -> Result<Page<Consultation>, ApiError> {
        let mut params = vec![
            ("page", query.page.to_string()),
            ("size", query.size.to_string()),
        ];
        if let Some(consultant_id) = query.consultant_id {
            params.push(("consultantId", consultant_id.to_string()));
        }
        let builder = self
            .request(
                Method::GET,
                &format!("/consultations/sender/{}", query.sender_id),
            )
            .query(&params);
        self.execute(builder).await
    }

    async fn grouped_for_consultant(
        &self,
        consultant_id: PrincipalId,
    ) -> Result<Vec<GroupedConsultationThread>, ApiError> {
        let builder = self.request(
            Method::GET,
            &format!("/consultations/consultant/{consultant_id}/grouped"),
        );
        self.execute(builder).await
    }

    async fn search_consultations(
        &self,
        consultant_id: PrincipalId,
        keyword: &str,
    ) -> Result<Vec<Consultation>, ApiError> {
        let builder = self
            .request(
                Method::GET,
                &format!("/consultations/consultant/{consultant_id}/search"),
            )
            .query(&[("keyword", keyword)]);
        self.execute(builder).await
    }
}
