//! `consultline history` - a sender's consultations, newest first.

use clap::Args;
use consultline_client::api::DEFAULT_PAGE_SIZE;
use consultline_client::{ConsultationApi, SenderQuery};
use consultline_protocol::PrincipalId;

use crate::output;
use crate::profile::Profile;

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Only the conversation with this consultant.
    #[arg(long)]
    pub consultant: Option<PrincipalId>,

    /// Zero-based page.
    #[arg(long, default_value_t = 0)]
    pub page: u32,

    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    pub size: u32,

    /// Print raw JSON instead of a table.
    #[arg(long)]
    pub json: bool,
}

pub async fn run(profile: &Profile, args: HistoryArgs) -> anyhow::Result<()> {
    let api = profile.api();
    let query = SenderQuery {
        sender_id: profile.principal.id,
        consultant_id: args.consultant,
        page: args.page,
        size: args.size,
    };
    let page = api.consultations_by_sender(query).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }

    if page.content.is_empty() {
        println!("No consultations.");
        return Ok(());
    }
    println!("{}", output::consultations(&page.content));
    println!(
        "Page {} of {} ({} total)",
        page.number + 1,
        page.total_pages.max(1),
        page.total_elements
    );
    if !page.is_last() {
        println!("More: --page {}", page.number + 1);
    }
    Ok(())
}
