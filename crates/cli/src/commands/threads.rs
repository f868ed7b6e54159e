//! `consultline threads` - a consultant's consultations grouped by sender.

use clap::Args;
use consultline_client::ConsultationApi;
use consultline_protocol::group_by_sender;

use crate::output;
use crate::profile::Profile;

#[derive(Debug, Args)]
pub struct ThreadsArgs {
    /// Only consultations whose title or content matches.
    #[arg(long, short)]
    pub keyword: Option<String>,

    /// Only threads with pending consultations.
    #[arg(long)]
    pub pending: bool,

    /// Print raw JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

pub async fn run(profile: &Profile, args: ThreadsArgs) -> anyhow::Result<()> {
    if !profile.principal.role.is_staff() {
        anyhow::bail!(
            "threads lists a consultant's inbox; #{} is {}",
            profile.principal.id,
            profile.principal.role
        );
    }

    let api = profile.api();
    let consultant_id = profile.principal.id;
    let keyword = args
        .keyword
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty());
    let mut threads = match keyword {
        Some(keyword) => group_by_sender(api.search_consultations(consultant_id, keyword).await?),
        None => api.grouped_for_consultant(consultant_id).await?,
    };
    if args.pending {
        threads.retain(|thread| thread.pending_count > 0);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&threads)?);
    } else if threads.is_empty() {
        println!("No consultations.");
    } else {
        println!("{}", output::threads(&threads));
    }
    Ok(())
}
