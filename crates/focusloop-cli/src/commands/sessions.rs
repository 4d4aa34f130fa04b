use clap::Subcommand;
use focusloop_core::recorder::{NoPrompt, SessionRecorder};
use focusloop_core::storage::Database;

use super::{open_retry_queue, ConsolePrompt};

#[derive(Subcommand)]
pub enum SessionsAction {
    /// List recent sessions, newest first
    List {
        /// Maximum number of sessions to show
        #[arg(long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Retry sessions the ledger could not store earlier
    Replay {
        /// Do not ask for accomplishments of replayed focus sessions
        #[arg(long)]
        quiet: bool,
    },
}

pub fn run(action: SessionsAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        SessionsAction::List { limit, json } => {
            let db = Database::open()?;
            let sessions = db.recent_sessions(limit)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
                return Ok(());
            }
            if sessions.is_empty() {
                println!("No sessions recorded yet.");
                return Ok(());
            }
            for s in &sessions {
                println!(
                    "{:>5}  {}  {:<5}  {:>3}:{:02}  {}  {}",
                    s.id,
                    s.started_at.format("%Y-%m-%d %H:%M"),
                    s.kind,
                    s.duration_secs / 60,
                    s.duration_secs % 60,
                    if s.completed { "done     " } else { "abandoned" },
                    s.activity_label
                );
            }
        }
        SessionsAction::Replay { quiet } => {
            let summary = if quiet {
                SessionRecorder::new(Database::open()?, NoPrompt, open_retry_queue()?)
                    .replay_pending()
            } else {
                SessionRecorder::new(Database::open()?, ConsolePrompt, open_retry_queue()?)
                    .replay_pending()
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}
