use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timer::{Phase, SessionRecord};

/// Every state change in the engine produces an Event.
/// The timer service routes them to the recorder, the notification
/// dispatcher and any subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    TimerStarted {
        phase: Phase,
        remaining_ms: u64,
        session_index: u32,
        at: DateTime<Utc>,
    },
    TimerPaused {
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    /// Engine returned to idle. Carries the incomplete record of the
    /// interval that was being tracked, if any.
    TimerReset {
        abandoned: Option<SessionRecord>,
        at: DateTime<Utc>,
    },
    IntervalCompleted {
        record: SessionRecord,
        next_phase: Phase,
        next_remaining_ms: u64,
        /// Session index after the transition.
        session_index: u32,
        /// Whether the next phase is already counting down.
        running: bool,
        play_sound: bool,
        capture_accomplishment: bool,
        at: DateTime<Utc>,
    },
    ConfigurationUpdated {
        phase: Phase,
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    /// Engine rebuilt from a persisted snapshot without completing.
    TimerRestored {
        phase: Phase,
        running: bool,
        remaining_ms: u64,
        elapsed_ms: u64,
        at: DateTime<Utc>,
    },
    Tick {
        phase: Phase,
        remaining_ms: u64,
        at: DateTime<Utc>,
    },
    StateSnapshot {
        phase: Phase,
        running: bool,
        remaining_ms: u64,
        total_ms: u64,
        progress: f64,
        session_index: u32,
        total_sessions: u32,
        activity_label: String,
        at: DateTime<Utc>,
    },
}

impl Event {
    /// The session record this event terminates, if any.
    pub fn session_record(&self) -> Option<&SessionRecord> {
        match self {
            Event::IntervalCompleted { record, .. } => Some(record),
            Event::TimerReset { abandoned, .. } => abandoned.as_ref(),
            _ => None,
        }
    }

    /// True when the event marks the end of a tracked interval.
    pub fn ends_interval(&self) -> bool {
        matches!(
            self,
            Event::IntervalCompleted { .. } | Event::TimerReset { .. }
        )
    }
}
