//! `consultline ask` / `consultline edit` - sender-side mutations.

use clap::Args;
use consultline_client::{ConsultationApi, LifecycleAction, LifecyclePolicy, SenderQuery};
use consultline_protocol::{ConsultationEdit, ConsultationId, NewConsultation, PrincipalId};

use crate::output;
use crate::profile::Profile;

#[derive(Debug, Args)]
pub struct AskArgs {
    /// Consultant to ask.
    #[arg(long)]
    pub consultant: PrincipalId,

    #[arg(long)]
    pub title: String,

    /// Question body.
    pub content: String,
}

#[derive(Debug, Args)]
pub struct EditArgs {
    pub id: ConsultationId,

    #[arg(long)]
    pub title: String,

    pub content: String,

    /// Allow editing after the question was answered.
    #[arg(long)]
    pub after_answer: bool,
}

pub async fn ask(profile: &Profile, args: AskArgs) -> anyhow::Result<()> {
    let api = profile.api();
    let created = api
        .create_consultation(NewConsultation {
            sender_id: profile.principal.id,
            consultant_id: args.consultant,
            title: args.title,
            content: args.content,
        })
        .await?;
    println!("Sent consultation #{}.", created.id);
    println!("{}", output::consultations(std::slice::from_ref(&created)));
    Ok(())
}

pub async fn edit(profile: &Profile, args: EditArgs) -> anyhow::Result<()> {
    let api = profile.api();
    let policy = LifecyclePolicy {
        sender_may_edit_after_answer: args.after_answer,
        ..LifecyclePolicy::default()
    };

    // The collaborator has no single-record read; walk the sender's pages.
    let mut page = 0;
    let current = loop {
        let result = api
            .consultations_by_sender(SenderQuery::new(profile.principal.id).page(page))
            .await?;
        if let Some(found) = result.content.iter().find(|c| c.id == args.id) {
            break found.clone();
        }
        if result.is_last() {
            anyhow::bail!("consultation #{} not found among your questions", args.id);
        }
        page += 1;
    };
    policy.check_actor(&current, LifecycleAction::SenderEdit, profile.principal.id)?;

    let updated = api
        .update_consultation(
            args.id,
            ConsultationEdit {
                title: args.title,
                content: args.content,
            },
        )
        .await?;
    println!("Updated consultation #{}.", updated.id);
    println!("{}", output::consultations(std::slice::from_ref(&updated)));
    Ok(())
}
