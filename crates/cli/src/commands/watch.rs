//! `consultline watch` - stay connected and print notifications as they land.

use std::sync::Arc;

use clap::Args;
use consultline_client::{
    disconnect_session, initialize_session, ConnectionState, SharedInbox, ToastEmitter,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use crate::output;
use crate::profile::Profile;

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Ignore stdin commands.
    #[arg(long)]
    pub no_input: bool,
}

/// Line commands accepted on stdin while watching.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    MarkAllRead,
    MarkRead(String),
    Clear,
    Reconnect,
    List,
    Unknown(String),
}

fn parse_input(line: &str) -> Option<Input> {
    let mut words = line.split_whitespace();
    let command = words.next()?;
    let input = match (command, words.next()) {
        ("read" | "r", None) => Input::MarkAllRead,
        ("read" | "r", Some(id)) => Input::MarkRead(id.to_string()),
        ("clear", _) => Input::Clear,
        ("reconnect", _) => Input::Reconnect,
        ("ls" | "list", _) => Input::List,
        (other, _) => Input::Unknown(other.to_string()),
    };
    Some(input)
}

pub async fn run(profile: &Profile, args: WatchArgs) -> anyhow::Result<()> {
    let inbox = SharedInbox::default();
    let (toast_tx, mut toast_rx) = mpsc::unbounded_channel();
    let config = profile
        .session_config()
        .with_listener(Arc::new(inbox.clone()))
        .with_listener(Arc::new(ToastEmitter::new(toast_tx)));

    let session = initialize_session(config).await;
    info!(
        component = "cli",
        event = "cli.watch.started",
        session_id = %session.id(),
        principal_id = profile.principal.id,
        "Watching notifications"
    );
    println!(
        "Watching as #{} ({}) on {}. Ctrl-C to stop; type `read`, `read <id>`, `clear`, `ls` or `reconnect`.",
        profile.principal.id, profile.principal.role, profile.endpoint
    );

    let mut state = session.watch_state();
    let mut summary = inbox.watch();
    let mut lines = (!args.no_input).then(|| BufReader::new(tokio::io::stdin()).lines());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(toast) = toast_rx.recv() => {
                println!("{}", output::toast(&toast));
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                println!("{}", output::state(current));
                if current == ConnectionState::Failed {
                    println!("Retries exhausted. Type `reconnect` to try again.");
                }
            }
            changed = summary.changed() => {
                if changed.is_ok() {
                    let current = summary.borrow_and_update().clone();
                    println!("{}", output::summary(&current));
                }
            }
            line = next_line(&mut lines) => {
                let Some(line) = line else {
                    lines = None;
                    continue;
                };
                match parse_input(&line) {
                    Some(Input::MarkAllRead) => inbox.mark_read(None),
                    Some(Input::MarkRead(id)) => inbox.mark_read(Some(&id)),
                    Some(Input::Clear) => inbox.clear(),
                    Some(Input::Reconnect) => session.reconnect(),
                    Some(Input::List) => {
                        for entry in inbox.entries() {
                            let marker = if entry.read { " " } else { "*" };
                            println!(
                                "{marker} {} {} {}",
                                entry.id.as_deref().unwrap_or("-"),
                                entry.kind.as_str(),
                                entry.message
                            );
                        }
                    }
                    Some(Input::Unknown(command)) => println!("Unknown command: {command}"),
                    None => {}
                }
            }
        }
    }

    disconnect_session().await;
    info!(
        component = "cli",
        event = "cli.watch.stopped",
        "Stopped watching"
    );
    Ok(())
}

async fn next_line(
    lines: &mut Option<tokio::io::Lines<BufReader<tokio::io::Stdin>>>,
) -> Option<String> {
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => std::future::pending().await,
    }
}
