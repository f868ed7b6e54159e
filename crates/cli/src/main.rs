//! Consultline CLI
//!
//! Watch a principal's consultation notifications live, browse threads and
//! ask or answer questions from the terminal.

mod commands;
mod logging;
mod output;
mod profile;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::commands::{ask, history, threads, triage, watch};
use crate::profile::{Profile, ProfileArgs};

#[derive(Parser)]
#[command(name = "consultline", version, about = "Real-time consultation notifications")]
struct Cli {
    #[command(flatten)]
    profile: ProfileArgs,

    /// Mirror logs to stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect and print notifications until Ctrl-C
    Watch(watch::WatchArgs),
    /// List your consultations (senders)
    History(history::HistoryArgs),
    /// List your inbox grouped by sender (consultants)
    Threads(threads::ThreadsArgs),
    /// Ask a consultant a question
    Ask(ask::AskArgs),
    /// Edit one of your questions
    Edit(ask::EditArgs),
    /// Answer a consultation, or replace an existing answer
    Answer(triage::AnswerArgs),
    /// Cancel a consultation
    Cancel(triage::CancelArgs),
    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Command::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "consultline", &mut std::io::stdout());
        return Ok(());
    }

    let data_dir = profile::data_dir();
    let _logging = logging::init_logging(&data_dir, cli.verbose)?;
    let profile = Profile::resolve(&cli.profile, &data_dir)?;

    let result = match cli.command {
        Command::Watch(args) => watch::run(&profile, args).await,
        Command::History(args) => history::run(&profile, args).await,
        Command::Threads(args) => threads::run(&profile, args).await,
        Command::Ask(args) => ask::ask(&profile, args).await,
        Command::Edit(args) => ask::edit(&profile, args).await,
        Command::Answer(args) => triage::answer(&profile, args).await,
        Command::Cancel(args) => triage::cancel(&profile, args).await,
        Command::Completions { .. } => Ok(()),
    };

    if let Err(e) = &result {
        tracing::error!(
            component = "cli",
            event = "cli.command.failed",
            error = %e,
            "Command failed"
        );
    }
    result
}
