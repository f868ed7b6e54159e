//! `consultline answer` / `consultline cancel` - consultant-side mutations.

use clap::Args;
use consultline_client::{ConsultationApi, LifecycleAction, LifecyclePolicy};
use consultline_protocol::{
    AnswerSubmission, CancelRequest, Consultation, ConsultationId, ConsultationStatus,
};

use crate::output;
use crate::profile::Profile;

#[derive(Debug, Args)]
pub struct AnswerArgs {
    pub id: ConsultationId,

    /// Answer text. Replaces the existing answer if there is one.
    pub answer: String,

    /// Allow answering a cancelled consultation.
    #[arg(long)]
    pub reopen: bool,
}

#[derive(Debug, Args)]
pub struct CancelArgs {
    pub id: ConsultationId,

    /// Resolution notes shown to the sender.
    #[arg(long)]
    pub notes: Option<String>,
}

async fn find(
    api: &dyn ConsultationApi,
    profile: &Profile,
    id: ConsultationId,
) -> anyhow::Result<Consultation> {
    let threads = api.grouped_for_consultant(profile.principal.id).await?;
    threads
        .into_iter()
        .flat_map(|thread| thread.consultations)
        .find(|c| c.id == id)
        .ok_or_else(|| anyhow::anyhow!("consultation #{id} is not in your inbox"))
}

pub async fn answer(profile: &Profile, args: AnswerArgs) -> anyhow::Result<()> {
    let api = profile.api();
    let policy = LifecyclePolicy {
        cancelled_reopenable: args.reopen,
        ..LifecyclePolicy::default()
    };
    let current = find(&*api, profile, args.id).await?;
    let action = if current.status == ConsultationStatus::Answered {
        LifecycleAction::EditAnswer
    } else {
        LifecycleAction::Answer
    };
    policy.check_actor(&current, action, profile.principal.id)?;

    let submission = AnswerSubmission {
        answer: args.answer,
    };
    let updated = match action {
        LifecycleAction::EditAnswer => api.update_answer(args.id, submission).await?,
        _ => api.submit_answer(args.id, submission).await?,
    };
    println!("Answered consultation #{}.", updated.id);
    println!("{}", output::consultations(std::slice::from_ref(&updated)));
    Ok(())
}

pub async fn cancel(profile: &Profile, args: CancelArgs) -> anyhow::Result<()> {
    let api = profile.api();
    let current = find(&*api, profile, args.id).await?;
    LifecyclePolicy::default().check_actor(&current, LifecycleAction::Cancel, profile.principal.id)?;

    let cancelled = api
        .cancel_consultation(
            args.id,
            CancelRequest {
                resolution_notes: args.notes,
            },
        )
        .await?;
    println!("Cancelled consultation #{}.", cancelled.id);
    Ok(())
}
