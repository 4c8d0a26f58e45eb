//! Terminal host for the assistant panel.
//!
//! Reads one utterance per line from stdin and prints the assistant's answer
//! as it streams in. Lines starting with `/` are panel commands:
//! `/building <id> [name]`, `/building` (clear), `/cancel` and `/quit`.

use std::collections::{HashMap, HashSet};
use std::env;
use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use asset_assistant::assistant::{
    AssistantSettings, BuildingContext, Dispatcher, RejectReason, Role, Session, SubmitOutcome,
    Turn, TurnId,
};
use asset_assistant::logging;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    let workspace_root = env::current_dir().context("cannot determine working directory")?;
    logging::init(&workspace_root)?;

    let settings = AssistantSettings::load(&workspace_root)?;
    let dispatcher = Arc::new(Dispatcher::from_settings(&settings)?);
    info!(
        "Assistant panel ready, session {}",
        dispatcher.conversation().session_id()
    );

    let renderer = tokio::spawn(render(
        dispatcher.conversation().subscribe(),
        std::io::stdout(),
    ));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Some(Command::Quit) => break,
            Some(Command::Cancel) => {
                if !dispatcher.cancel() {
                    println!("(nothing to cancel)");
                }
            }
            Some(Command::Building(building)) => {
                match &building {
                    Some(building) => println!("(building context: {})", building.id),
                    None => println!("(building context cleared)"),
                }
                dispatcher.set_building_context(building);
            }
            None => {
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    if let SubmitOutcome::Rejected(reason) = dispatcher.submit(&line).await {
                        match reason {
                            RejectReason::Busy => println!("(still answering, please wait)"),
                            RejectReason::Closed => println!("(panel closed)"),
                            RejectReason::EmptyInput => {}
                        }
                    }
                });
            }
        }
    }

    dispatcher.close();
    renderer.abort();
    Ok(())
}

enum Command {
    Quit,
    Cancel,
    Building(Option<BuildingContext>),
}

fn parse_command(line: &str) -> Option<Command> {
    let rest = line.trim().strip_prefix('/')?;
    let (name, args) = rest.split_once(' ').unwrap_or((rest, ""));
    match name {
        "quit" | "exit" => Some(Command::Quit),
        "cancel" => Some(Command::Cancel),
        "building" => {
            let args = args.trim();
            if args.is_empty() {
                return Some(Command::Building(None));
            }
            let (id, name) = args.split_once(' ').unwrap_or((args, ""));
            let name = Some(name.trim().to_string()).filter(|name| !name.is_empty());
            Some(Command::Building(Some(BuildingContext::new(id, name))))
        }
        _ => None,
    }
}

/// Prints assistant turns incrementally as the session changes.
///
/// Stops at the first write error, e.g. when stdout is a closed pipe.
async fn render(mut updates: watch::Receiver<Session>, mut out: impl Write) {
    let mut progress = RenderProgress::default();
    while updates.changed().await.is_ok() {
        let output = {
            let session = updates.borrow_and_update();
            progress.pending_output(session.turns())
        };
        if output.is_empty() {
            continue;
        }
        if let Err(err) = out.write_all(output.as_bytes()).and_then(|()| out.flush()) {
            warn!("Stopped rendering answers: {}", err);
            break;
        }
    }
}

/// What has already been printed of each assistant turn.
#[derive(Default)]
struct RenderProgress {
    shown: HashMap<TurnId, String>,
    finished: HashSet<TurnId>,
}

impl RenderProgress {
    fn pending_output(&mut self, turns: &[Turn]) -> String {
        let mut output = String::new();
        for turn in turns.iter().filter(|turn| turn.role() == Role::Assistant) {
            if self.finished.contains(&turn.id()) {
                continue;
            }
            let printed = self.shown.entry(turn.id()).or_default();
            match turn.content().strip_prefix(printed.as_str()) {
                Some(delta) => {
                    output.push_str(delta);
                    printed.push_str(delta);
                }
                // Settling may replace the streamed text with a fallback message.
                None => {
                    output.push('\n');
                    output.push_str(turn.content());
                    *printed = turn.content().to_string();
                }
            }
            if !turn.is_streaming() {
                output.push('\n');
                self.shown.remove(&turn.id());
                self.finished.insert(turn.id());
            }
        }
        output
    }
}
