pub mod config;
pub mod sessions;
pub mod timer;

use focusloop_core::recorder::{AccomplishmentPrompt, RetryQueue, SessionId};
use focusloop_core::storage::data_dir;

/// Retry queue shared by every command, loaded from the data directory.
pub fn open_retry_queue() -> Result<RetryQueue, Box<dyn std::error::Error>> {
    let path = data_dir()?.join("retry_queue.json");
    Ok(RetryQueue::open(&path)?)
}

/// Nudges the user on stderr once a focus interval is safely recorded.
#[derive(Debug, Default)]
pub struct ConsolePrompt;

impl AccomplishmentPrompt for ConsolePrompt {
    fn request_accomplishment_capture(&mut self, session_id: &SessionId) {
        eprintln!("Focus session #{session_id} recorded. What did you get done?");
    }
}
