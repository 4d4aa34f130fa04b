//! Timer engine implementation.
//!
//! The timer engine is a wall-clock-based state machine. It does not use
//! internal threads - the caller is responsible for calling `tick()` periodically
//! (see [`super::service::TimerService`] for the owned scheduler).
//!
//! ## State Transitions
//!
//! ```text
//! Idle --start--> Focus(running) <--pause/start--> Focus(paused)
//! Focus(running) --tick->0--> Break(running) --tick->0--> Idle
//! any --reset--> Idle
//! ```
//!
//! Remaining time is always derived from elapsed wall-clock time, never from
//! the number of `tick()` calls, so duplicate or missing ticks do not skew it.
//!
//! ## Usage
//!
//! ```ignore
//! let mut engine = TimerEngine::new(TimerConfiguration::default());
//! engine.start();
//! // In a loop:
//! engine.tick(); // Returns Some(Event) when an interval completes
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::config::{IntervalKind, TimerConfiguration};
use super::record::{ms_to_secs, SessionRecord};
use super::remaining::{compute_remaining, display_secs};
use crate::clock::{to_datetime, Clock, SystemClock};
use crate::error::ValidationError;
use crate::events::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Focus,
    Break,
}

impl Phase {
    pub fn kind(self) -> Option<IntervalKind> {
        match self {
            Phase::Idle => None,
            Phase::Focus => Some(IntervalKind::Focus),
            Phase::Break => Some(IntervalKind::Break),
        }
    }
}

/// Everything needed to rebuild the engine after a suspension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub phase: Phase,
    pub running: bool,
    /// Remaining countdown at `taken_at_ms`.
    pub remaining_ms: u64,
    pub session_index: u32,
    pub total_sessions: u32,
    pub activity_label: String,
    /// When the tracked interval first started, if one is tracked.
    pub session_start_ms: Option<u64>,
    /// Countdown time already consumed by the tracked interval.
    pub active_ms: u64,
    pub taken_at_ms: u64,
}

impl TimerSnapshot {
    /// Reject a snapshot whose interval could not have come from `config`.
    ///
    /// Consumed plus remaining time must be a positive length no longer than
    /// the longest configured interval.
    pub fn validate(&self, config: &TimerConfiguration) -> Result<(), String> {
        if self.phase == Phase::Idle {
            return Ok(());
        }
        let length = self.remaining_ms.saturating_add(self.active_ms);
        let longest = config
            .focus_ms()
            .max(config.break_duration_secs.saturating_mul(1000))
            .max(config.long_break_duration_secs.saturating_mul(1000));
        if length == 0 {
            return Err(format!("{:?} interval has no length", self.phase));
        }
        if length > longest {
            return Err(format!(
                "{:?} interval of {length} ms exceeds the longest configured interval of {longest} ms",
                self.phase
            ));
        }
        Ok(())
    }
}

/// Core timer engine.
///
/// Operates on wall-clock deltas -- no internal thread.
/// Owned by exactly one controller at a time.
#[derive(Debug, Clone)]
pub struct TimerEngine {
    config: TimerConfiguration,
    clock: Arc<dyn Clock>,
    phase: Phase,
    running: bool,
    /// Remaining time in milliseconds, as of `last_tick_ms` while running.
    remaining_ms: u64,
    session_index: u32,
    total_sessions: u32,
    activity_label: String,
    session_start_ms: Option<u64>,
    active_ms: u64,
    /// Wall-clock instant the countdown was last flushed. Only set while running.
    last_tick_ms: Option<u64>,
    /// Bumped on every transition that arms or disarms the tick.
    generation: u64,
}

impl TimerEngine {
    /// Create a new engine reading the system clock.
    ///
    /// Starts `Idle` with the focus duration pre-loaded.
    pub fn new(config: TimerConfiguration) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: TimerConfiguration, clock: Arc<dyn Clock>) -> Self {
        Self {
            remaining_ms: config.focus_ms(),
            config,
            clock,
            phase: Phase::Idle,
            running: false,
            session_index: 1,
            total_sessions: 0,
            activity_label: String::new(),
            session_start_ms: None,
            active_ms: 0,
            last_tick_ms: None,
            generation: 0,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn config(&self) -> &TimerConfiguration {
        &self.config
    }

    /// Remaining milliseconds as of now. Does not mutate the engine.
    pub fn remaining_ms(&self) -> u64 {
        self.remaining_at(self.clock.now_ms())
    }

    pub fn remaining_secs(&self) -> u64 {
        display_secs(self.remaining_ms())
    }

    pub fn session_index(&self) -> u32 {
        self.session_index
    }

    pub fn total_sessions(&self) -> u32 {
        self.total_sessions
    }

    pub fn activity_label(&self) -> &str {
        &self.activity_label
    }

    pub fn session_start_ms(&self) -> Option<u64> {
        self.session_start_ms
    }

    /// True while an interval is being tracked (started but not finished).
    pub fn is_tracking(&self) -> bool {
        self.session_start_ms.is_some()
    }

    /// Current tick generation. Ticks stamped with an older value are ignored.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Nominal length of the current phase.
    pub fn total_ms(&self) -> u64 {
        self.nominal_ms_for(&self.config)
    }

    /// 0.0 .. 1.0 progress within the current phase.
    pub fn progress(&self) -> f64 {
        let total = self.total_ms();
        if total == 0 {
            return 0.0;
        }
        1.0 - (self.remaining_ms() as f64 / total as f64)
    }

    /// Capture the engine state as of now.
    pub fn snapshot(&self) -> TimerSnapshot {
        let now = self.clock.now_ms();
        let remaining = self.remaining_at(now);
        TimerSnapshot {
            phase: self.phase,
            running: self.running,
            remaining_ms: remaining,
            session_index: self.session_index,
            total_sessions: self.total_sessions,
            activity_label: self.activity_label.clone(),
            session_start_ms: self.session_start_ms,
            active_ms: self.active_ms + (self.remaining_ms - remaining),
            taken_at_ms: now,
        }
    }

    /// Build a full state snapshot event.
    pub fn status(&self) -> Event {
        Event::StateSnapshot {
            phase: self.phase,
            running: self.running,
            remaining_ms: self.remaining_ms(),
            total_ms: self.total_ms(),
            progress: self.progress(),
            session_index: self.session_index,
            total_sessions: self.total_sessions,
            activity_label: self.activity_label.clone(),
            at: to_datetime(self.clock.now_ms()),
        }
    }

    pub fn tick_event(&self) -> Event {
        Event::Tick {
            phase: self.phase,
            remaining_ms: self.remaining_ms(),
            at: to_datetime(self.clock.now_ms()),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn set_activity_label(&mut self, label: impl Into<String>) {
        self.activity_label = label.into();
    }

    pub fn start_with_label(&mut self, label: impl Into<String>) -> Option<Event> {
        self.set_activity_label(label);
        self.start()
    }

    pub fn start(&mut self) -> Option<Event> {
        if self.running {
            return None;
        }
        let now = self.clock.now_ms();
        if self.phase == Phase::Idle {
            self.phase = Phase::Focus;
            self.remaining_ms = self.config.focus_ms();
            self.active_ms = 0;
        }
        if self.session_start_ms.is_none() {
            self.session_start_ms = Some(now);
        }
        self.running = true;
        self.last_tick_ms = Some(now);
        self.generation += 1;
        info!(
            phase = ?self.phase,
            remaining_ms = self.remaining_ms,
            session_index = self.session_index,
            "timer started"
        );
        Some(Event::TimerStarted {
            phase: self.phase,
            remaining_ms: self.remaining_ms,
            session_index: self.session_index,
            at: to_datetime(now),
        })
    }

    /// Pause the countdown.
    ///
    /// If the interval ran out before the pause arrived, the interval completes
    /// instead and the completion event is returned.
    pub fn pause(&mut self) -> Option<Event> {
        if !self.running {
            return None;
        }
        let now = self.clock.now_ms();
        self.flush_elapsed(now);
        if self.remaining_ms == 0 {
            return Some(self.complete_at(now));
        }
        self.running = false;
        self.last_tick_ms = None;
        self.generation += 1;
        info!(remaining_ms = self.remaining_ms, "timer paused");
        Some(Event::TimerPaused {
            remaining_ms: self.remaining_ms,
            at: to_datetime(now),
        })
    }

    /// Abandon the tracked interval and return to idle.
    pub fn reset(&mut self) -> Event {
        let now = self.clock.now_ms();
        let abandoned = match (self.phase.kind(), self.session_start_ms) {
            (Some(kind), Some(start)) => Some(SessionRecord {
                started_at: to_datetime(start),
                duration_secs: ms_to_secs(now.saturating_sub(start)),
                kind,
                completed: false,
                activity_label: self.activity_label.clone(),
            }),
            _ => None,
        };

        self.phase = Phase::Idle;
        self.running = false;
        self.remaining_ms = self.config.focus_ms();
        self.session_index = 1;
        self.session_start_ms = None;
        self.active_ms = 0;
        self.last_tick_ms = None;
        self.generation += 1;
        info!(abandoned = abandoned.is_some(), "timer reset");
        Event::TimerReset {
            abandoned,
            at: to_datetime(now),
        }
    }

    /// Call periodically. Returns `Some(Event::IntervalCompleted)` when the
    /// interval finishes.
    pub fn tick(&mut self) -> Option<Event> {
        self.tick_for(self.generation)
    }

    /// Tick stamped with the generation it was scheduled under.
    ///
    /// A tick from a cancelled schedule is a no-op.
    pub fn tick_for(&mut self, generation: u64) -> Option<Event> {
        if generation != self.generation {
            debug!(
                stale = generation,
                current = self.generation,
                "dropping stale tick"
            );
            return None;
        }
        if !self.running {
            return None;
        }
        let now = self.clock.now_ms();
        self.flush_elapsed(now);
        if self.remaining_ms == 0 {
            return Some(self.complete_at(now));
        }
        None
    }

    /// Finish the current interval now, as if its countdown reached zero.
    ///
    /// Returns `None` when idle.
    pub fn complete_interval(&mut self) -> Option<Event> {
        if self.phase == Phase::Idle {
            return None;
        }
        let now = self.clock.now_ms();
        self.flush_elapsed(now);
        Some(self.complete_at(now))
    }

    /// Replace the configuration.
    ///
    /// When the nominal length of the active phase changes, remaining time is
    /// recomputed from the new nominal length minus what was already consumed,
    /// so the display may jump.
    pub fn update_configuration(
        &mut self,
        config: TimerConfiguration,
    ) -> Result<Event, ValidationError> {
        config.validate()?;
        let now = self.clock.now_ms();
        self.flush_elapsed(now);

        let old_nominal = self.nominal_ms_for(&self.config);
        let new_nominal = self.nominal_ms_for(&config);
        self.config = config;

        if self.phase == Phase::Idle {
            self.remaining_ms = self.config.focus_ms();
        } else if new_nominal != old_nominal {
            self.remaining_ms = new_nominal.saturating_sub(self.active_ms);
        }
        info!(
            phase = ?self.phase,
            remaining_ms = self.remaining_ms,
            "configuration updated"
        );
        Ok(Event::ConfigurationUpdated {
            phase: self.phase,
            remaining_ms: self.remaining_ms,
            at: to_datetime(now),
        })
    }

    /// Rebuild the engine from a snapshot taken earlier.
    ///
    /// A running snapshot is advanced by the wall-clock time since it was
    /// taken. If that exhausts the interval, it completes exactly once and the
    /// completion event is returned.
    pub fn restore(&mut self, snapshot: &TimerSnapshot, now_ms: u64) -> Event {
        self.phase = snapshot.phase;
        self.session_index = snapshot.session_index.max(1);
        self.total_sessions = snapshot.total_sessions;
        self.activity_label = snapshot.activity_label.clone();
        self.generation += 1;

        if self.phase == Phase::Idle {
            self.running = false;
            self.remaining_ms = self.config.focus_ms();
            self.session_start_ms = None;
            self.active_ms = 0;
            self.last_tick_ms = None;
            return self.restored_event(0, now_ms);
        }

        self.session_start_ms = snapshot.session_start_ms;
        self.running = snapshot.running;

        if !snapshot.running {
            self.remaining_ms = snapshot.remaining_ms;
            self.active_ms = snapshot.active_ms;
            self.last_tick_ms = None;
            return self.restored_event(0, now_ms);
        }

        let elapsed = now_ms.saturating_sub(snapshot.taken_at_ms);
        let remaining = compute_remaining(snapshot.remaining_ms, snapshot.taken_at_ms, now_ms);
        self.remaining_ms = remaining;
        self.active_ms = snapshot.active_ms + (snapshot.remaining_ms - remaining);
        self.last_tick_ms = Some(now_ms);

        if remaining == 0 {
            info!(elapsed_ms = elapsed, "interval elapsed while suspended");
            return self.complete_at(now_ms);
        }
        self.restored_event(elapsed, now_ms)
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn restored_event(&self, elapsed_ms: u64, now_ms: u64) -> Event {
        info!(
            phase = ?self.phase,
            running = self.running,
            remaining_ms = self.remaining_ms,
            "timer restored"
        );
        Event::TimerRestored {
            phase: self.phase,
            running: self.running,
            remaining_ms: self.remaining_ms,
            elapsed_ms,
            at: to_datetime(now_ms),
        }
    }

    fn remaining_at(&self, now: u64) -> u64 {
        match self.last_tick_ms {
            Some(last) if self.running => compute_remaining(self.remaining_ms, last, now),
            _ => self.remaining_ms,
        }
    }

    fn flush_elapsed(&mut self, now: u64) {
        if let Some(last) = self.last_tick_ms {
            let before = self.remaining_ms;
            self.remaining_ms = compute_remaining(before, last, now);
            self.active_ms += before - self.remaining_ms;
            self.last_tick_ms = Some(now);
        }
    }

    fn nominal_ms_for(&self, config: &TimerConfiguration) -> u64 {
        match self.phase {
            Phase::Idle | Phase::Focus => config.focus_ms(),
            Phase::Break => config.break_ms_after(self.session_index),
        }
    }

    /// The single completion path. Callers have already flushed elapsed time.
    fn complete_at(&mut self, now: u64) -> Event {
        let kind = self.phase.kind().unwrap_or(IntervalKind::Focus);
        let started = self
            .session_start_ms
            .unwrap_or_else(|| now.saturating_sub(self.active_ms));
        let record = SessionRecord {
            started_at: to_datetime(started),
            duration_secs: ms_to_secs(self.active_ms),
            kind,
            completed: true,
            activity_label: self.activity_label.clone(),
        };
        self.generation += 1;
        self.active_ms = 0;

        let capture_accomplishment = kind == IntervalKind::Focus;
        match kind {
            IntervalKind::Focus => {
                self.total_sessions += 1;
                self.phase = Phase::Break;
                self.remaining_ms = self.config.break_ms_after(self.session_index);
                if self.running {
                    self.session_start_ms = Some(now);
                    self.last_tick_ms = Some(now);
                } else {
                    self.session_start_ms = None;
                    self.last_tick_ms = None;
                }
            }
            IntervalKind::Break => {
                self.phase = Phase::Idle;
                self.running = false;
                self.remaining_ms = self.config.focus_ms();
                self.session_index += 1;
                self.session_start_ms = None;
                self.last_tick_ms = None;
            }
        }

        info!(
            kind = kind.as_str(),
            duration_secs = record.duration_secs,
            next_phase = ?self.phase,
            session_index = self.session_index,
            "interval completed"
        );
        Event::IntervalCompleted {
            record,
            next_phase: self.phase,
            next_remaining_ms: self.remaining_ms,
            session_index: self.session_index,
            running: self.running,
            play_sound: true,
            capture_accomplishment,
            at: to_datetime(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn engine() -> (TimerEngine, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let cfg = TimerConfiguration::new(1500, 300, 900, 4).unwrap();
        (TimerEngine::with_clock(cfg, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn start_pause_resume() {
        let (mut engine, clock) = engine();
        assert_eq!(engine.phase(), Phase::Idle);

        assert!(engine.start().is_some());
        assert_eq!(engine.phase(), Phase::Focus);
        assert!(engine.is_running());
        assert!(engine.start().is_none());

        clock.advance_secs(10);
        assert!(engine.pause().is_some());
        assert!(!engine.is_running());
        assert_eq!(engine.remaining_secs(), 1490);

        clock.advance_secs(100);
        assert_eq!(engine.remaining_secs(), 1490);

        assert!(engine.start().is_some());
        assert_eq!(engine.phase(), Phase::Focus);
        assert_eq!(engine.session_start_ms(), Some(1_000_000));
    }

    #[test]
    fn label_survives_into_reset_record() {
        let (mut engine, clock) = engine();
        engine.start_with_label("inbox zero");
        clock.advance_secs(3);
        let record = engine.reset().session_record().cloned().unwrap();
        assert_eq!(record.activity_label, "inbox zero");
        assert_eq!(record.duration_secs, 3);
    }

    #[test]
    fn duplicate_ticks_do_not_double_decrement() {
        let (mut engine, clock) = engine();
        engine.start();
        clock.advance_secs(1);
        assert!(engine.tick().is_none());
        assert!(engine.tick().is_none());
        assert_eq!(engine.remaining_secs(), 1499);
    }

    #[test]
    fn stale_generation_is_ignored() {
        let (mut engine, clock) = engine();
        engine.start();
        let armed = engine.generation();
        engine.pause();
        engine.start();
        clock.advance_secs(1500);
        assert!(engine.tick_for(armed).is_none());
        assert_eq!(engine.phase(), Phase::Focus);
        assert!(engine.tick().is_some());
    }

    #[test]
    fn focus_completion_moves_to_running_break() {
        let (mut engine, clock) = engine();
        engine.start();
        clock.advance_secs(1500);
        match engine.tick() {
            Some(Event::IntervalCompleted {
                record,
                next_phase,
                next_remaining_ms,
                running,
                capture_accomplishment,
                ..
            }) => {
                assert_eq!(record.kind, IntervalKind::Focus);
                assert!(record.completed);
                assert_eq!(record.duration_secs, 1500);
                assert_eq!(next_phase, Phase::Break);
                assert_eq!(next_remaining_ms, 300_000);
                assert!(running);
                assert!(capture_accomplishment);
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(engine.total_sessions(), 1);
        assert!(engine.tick().is_none());
    }

    #[test]
    fn break_completion_returns_to_idle() {
        let (mut engine, clock) = engine();
        engine.start();
        clock.advance_secs(1500);
        engine.tick();
        clock.advance_secs(300);
        match engine.tick() {
            Some(Event::IntervalCompleted {
                record,
                next_phase,
                capture_accomplishment,
                ..
            }) => {
                assert_eq!(record.kind, IntervalKind::Break);
                assert_eq!(record.duration_secs, 300);
                assert_eq!(next_phase, Phase::Idle);
                assert!(!capture_accomplishment);
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(engine.phase(), Phase::Idle);
        assert!(!engine.is_running());
        assert_eq!(engine.session_index(), 2);
        assert_eq!(engine.remaining_secs(), 1500);
    }

    #[test]
    fn reset_records_measured_duration() {
        let (mut engine, clock) = engine();
        engine.set_activity_label("writing");
        engine.start();
        clock.advance_secs(5);
        match engine.reset() {
            Event::TimerReset {
                abandoned: Some(record),
                ..
            } => {
                assert_eq!(record.duration_secs, 5);
                assert!(!record.completed);
                assert_eq!(record.activity_label, "writing");
            }
            other => panic!("expected abandoned record, got {other:?}"),
        }
        assert_eq!(engine.phase(), Phase::Idle);
        assert_eq!(engine.session_index(), 1);
        assert_eq!(engine.remaining_secs(), 1500);
    }

    #[test]
    fn reset_when_idle_has_no_record() {
        let (mut engine, _clock) = engine();
        assert!(engine.reset().session_record().is_none());
    }

    #[test]
    fn update_configuration_keeps_consumed_time() {
        let (mut engine, clock) = engine();
        engine.start();
        clock.advance_secs(100);
        let cfg = TimerConfiguration::new(1200, 300, 900, 4).unwrap();
        engine.update_configuration(cfg).unwrap();
        assert_eq!(engine.remaining_secs(), 1100);
    }

    #[test]
    fn update_configuration_reloads_idle_focus() {
        let (mut engine, _clock) = engine();
        let cfg = TimerConfiguration::new(600, 300, 900, 4).unwrap();
        engine.update_configuration(cfg).unwrap();
        assert_eq!(engine.remaining_secs(), 600);
    }

    #[test]
    fn update_configuration_rejects_invalid() {
        let (mut engine, _clock) = engine();
        let bad = TimerConfiguration {
            long_break_interval: 0,
            ..TimerConfiguration::default()
        };
        assert!(engine.update_configuration(bad).is_err());
        assert_eq!(engine.config().long_break_interval, 4);
    }

    #[test]
    fn restore_paused_snapshot_verbatim() {
        let (mut engine, clock) = engine();
        engine.start();
        clock.advance_secs(30);
        engine.pause();
        let snap = engine.snapshot();

        let (mut fresh, _) = self::engine();
        clock.advance_secs(5000);
        let event = fresh.restore(&snap, clock.now_ms());
        assert!(matches!(event, Event::TimerRestored { running: false, .. }));
        assert_eq!(fresh.remaining_ms(), 1_470_000);
        assert_eq!(fresh.session_start_ms(), Some(1_000_000));
    }

    #[test]
    fn restore_with_backwards_clock_clamps() {
        let (mut engine, clock) = engine();
        engine.start();
        clock.advance_secs(10);
        let snap = engine.snapshot();
        let event = engine.restore(&snap, snap.taken_at_ms - 60_000);
        assert!(matches!(event, Event::TimerRestored { elapsed_ms: 0, .. }));
        assert_eq!(engine.phase(), Phase::Focus);
    }
}
