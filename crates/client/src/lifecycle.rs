//! Which consultation mutations are allowed from which status.
//!
//! PENDING → ANSWERED → (answer edits) is the normal path. CANCELLED is
//! terminal unless the policy reopens it. Sender edits stop at ANSWERED unless
//! the policy allows them.

use consultline_protocol::{Consultation, ConsultationId, ConsultationStatus, PrincipalId};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    SenderEdit,
    Answer,
    EditAnswer,
    Cancel,
}

impl LifecycleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleAction::SenderEdit => "edit",
            LifecycleAction::Answer => "answer",
            LifecycleAction::EditAnswer => "edit answer",
            LifecycleAction::Cancel => "cancel",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("cannot {} consultation {id} while it is {status:?}", .action.as_str())]
    NotAllowed {
        id: ConsultationId,
        status: ConsultationStatus,
        action: LifecycleAction,
    },

    #[error("principal {principal_id} is not a party to consultation {id}")]
    NotParticipant {
        id: ConsultationId,
        principal_id: PrincipalId,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecyclePolicy {
    pub sender_may_edit_after_answer: bool,
    pub cancelled_reopenable: bool,
}

impl LifecyclePolicy {
    pub fn check(
        &self,
        consultation: &Consultation,
        action: LifecycleAction,
    ) -> Result<(), LifecycleError> {
        use ConsultationStatus::*;

        let status = consultation.status;
        let allowed = match (action, status) {
            (LifecycleAction::SenderEdit, Pending) => true,
            (LifecycleAction::SenderEdit, Answered) => self.sender_may_edit_after_answer,
            (LifecycleAction::Answer, Pending) => true,
            (LifecycleAction::EditAnswer, Answered) => true,
            (LifecycleAction::Cancel, Pending | Answered) => true,
            (_, Cancelled) => self.cancelled_reopenable && action != LifecycleAction::Cancel,
            _ => false,
        };

        if allowed {
            Ok(())
        } else {
            Err(LifecycleError::NotAllowed {
                id: consultation.id,
                status,
                action,
            })
        }
    }

    /// `check` plus: the acting principal must be the sender (for sender
    /// edits) or the consultant (for everything else).
    pub fn check_actor(
        &self,
        consultation: &Consultation,
        action: LifecycleAction,
        principal_id: PrincipalId,
    ) -> Result<(), LifecycleError> {
        let party = match action {
            LifecycleAction::SenderEdit => consultation.sender.id,
            _ => consultation.consultant.id,
        };
        if party != principal_id {
            return Err(LifecycleError::NotParticipant {
                id: consultation.id,
                principal_id,
            });
        }
        self.check(consultation, action)
    }
}
