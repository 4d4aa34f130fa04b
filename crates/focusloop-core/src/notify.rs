//! Completion cue.

use std::io::Write;

use tracing::warn;

use crate::error::NotifyError;
use crate::events::Event;

/// Plays the audible/visual signal for a finished interval.
pub trait CompletionSound: Send {
    fn play_completion_sound(&self) -> Result<(), NotifyError>;
}

/// Rings the terminal bell on stderr.
#[derive(Debug, Default)]
pub struct TerminalBell;

impl CompletionSound for TerminalBell {
    fn play_completion_sound(&self) -> Result<(), NotifyError> {
        let mut err = std::io::stderr();
        err.write_all(b"\x07")
            .and_then(|_| err.flush())
            .map_err(|e| NotifyError(e.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct SilentSound;

impl CompletionSound for SilentSound {
    fn play_completion_sound(&self) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Best-effort dispatcher: playback failure is logged and never propagated.
pub struct NotificationDispatcher {
    sound: Box<dyn CompletionSound>,
    enabled: bool,
}

impl NotificationDispatcher {
    pub fn new(sound: Box<dyn CompletionSound>, enabled: bool) -> Self {
        Self { sound, enabled }
    }

    pub fn silent() -> Self {
        Self::new(Box::new(SilentSound), false)
    }

    /// Play the cue if `event` asks for one. Returns whether it played.
    pub fn dispatch(&self, event: &Event) -> bool {
        let wants_sound = matches!(
            event,
            Event::IntervalCompleted {
                play_sound: true,
                ..
            }
        );
        if !wants_sound || !self.enabled {
            return false;
        }
        match self.sound.play_completion_sound() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "completion sound failed");
                false
            }
        }
    }
}
