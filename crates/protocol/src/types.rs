//! Core types shared across the protocol

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::notification::parse_timestamp;

pub type PrincipalId = i64;
pub type ConsultationId = i64;

/// `code` carried by a successful collaborator response.
pub const API_SUCCESS_CODE: i32 = 1000;

/// Principal role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    EndUser,
    Consultant,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::EndUser => "END_USER",
            Role::Consultant => "CONSULTANT",
            Role::Admin => "ADMIN",
        }
    }

    /// Consultants and admins answer questions; everyone else asks them.
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Consultant | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "END_USER" | "USER" => Ok(Role::EndUser),
            "CONSULTANT" => Ok(Role::Consultant),
            "ADMIN" => Ok(Role::Admin),
            _ => Err(format!("unknown role: {}", s.trim())),
        }
    }
}

/// The authenticated actor a session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub id: PrincipalId,
    pub role: Role,
}

impl Principal {
    pub fn new(id: PrincipalId, role: Role) -> Self {
        Self { id, role }
    }
}

/// Principal as embedded in consultation records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalRef {
    pub id: PrincipalId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl PrincipalRef {
    pub fn id_only(id: PrincipalId) -> Self {
        Self {
            id,
            full_name: None,
            email: None,
            avatar_url: None,
        }
    }
}

/// Consultation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsultationStatus {
    Pending,
    Answered,
    Cancelled,
}

impl ConsultationStatus {
    /// Answered threads still accept answer edits; only cancellation is final.
    pub fn is_hard_terminal(&self) -> bool {
        matches!(self, ConsultationStatus::Cancelled)
    }
}

/// One question/answer unit between a sender and a consultant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Consultation {
    pub id: ConsultationId,
    pub sender: PrincipalRef,
    pub consultant: PrincipalRef,
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub status: ConsultationStatus,
    pub sent_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consultant_updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_notes: Option<String>,
}

impl Consultation {
    /// Whether this record belongs to the conversation between `sender_id`
    /// and `consultant_id`.
    pub fn is_between(&self, sender_id: PrincipalId, consultant_id: PrincipalId) -> bool {
        self.sender.id == sender_id && self.consultant.id == consultant_id
    }
}

/// Body of a create request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConsultation {
    pub sender_id: PrincipalId,
    pub consultant_id: PrincipalId,
    pub title: String,
    pub content: String,
}

/// Body of a sender-side edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationEdit {
    pub title: String,
    pub content: String,
}

/// Body of an answer submission or edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerSubmission {
    pub answer: String,
}

/// Body of a cancellation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_notes: Option<String>,
}

/// Response wrapper used by every collaborator endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub code: i32,
    #[serde(default)]
    pub message: Option<String>,
    pub result: Option<T>,
}

impl<T> ApiEnvelope<T> {
    pub fn is_success(&self) -> bool {
        self.code == API_SUCCESS_CODE
    }
}

/// Spring-style page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    #[serde(default)]
    pub total_elements: u64,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub number: u32,
    #[serde(default)]
    pub size: u32,
}

impl<T> Page<T> {
    pub fn is_last(&self) -> bool {
        self.total_pages == 0 || self.number + 1 >= self.total_pages
    }
}

/// All consultations from one sender, as shown in a consultant's triage list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedConsultationThread {
    pub sender_id: PrincipalId,
    pub sender: PrincipalRef,
    pub consultations: Vec<Consultation>,
    #[serde(default)]
    pub pending_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sent_at: Option<String>,
}

/// Group a flat list by sender. Consultations are newest first within a
/// group, and groups are ordered by their newest consultation.
pub fn group_by_sender(consultations: Vec<Consultation>) -> Vec<GroupedConsultationThread> {
    let mut order: Vec<PrincipalId> = Vec::new();
    let mut groups: HashMap<PrincipalId, Vec<Consultation>> = HashMap::new();
    for consultation in consultations {
        let sender_id = consultation.sender.id;
        groups
            .entry(sender_id)
            .or_insert_with(|| {
                order.push(sender_id);
                Vec::new()
            })
            .push(consultation);
    }

    let mut threads: Vec<GroupedConsultationThread> = order
        .into_iter()
        .filter_map(|sender_id| {
            let mut items = groups.remove(&sender_id)?;
            items.sort_by(|a, b| sent_key(b).cmp(&sent_key(a)));
            let sender = items.first()?.sender.clone();
            let pending_count = items
                .iter()
                .filter(|c| c.status == ConsultationStatus::Pending)
                .count();
            let last_sent_at = items.first().map(|c| c.sent_at.clone());
            Some(GroupedConsultationThread {
                sender_id,
                sender,
                consultations: items,
                pending_count,
                last_sent_at,
            })
        })
        .collect();

    threads.sort_by(|a, b| {
        let newest = |t: &GroupedConsultationThread| t.consultations.first().map(sent_key);
        newest(b).cmp(&newest(a))
    });
    threads
}

fn sent_key(consultation: &Consultation) -> (Option<i64>, String) {
    (
        parse_timestamp(&consultation.sent_at).map(|t| t.timestamp_millis()),
        consultation.sent_at.clone(),
    )
}
