//! # Focusloop Core Library
//!
//! Core logic for the Focusloop focus/break interval timer. Everything the
//! `focusloop` CLI does goes through this crate, and a GUI host would embed
//! it the same way.
//!
//! ## Architecture
//!
//! - **Timer Engine**: a wall-clock-derived state machine. Remaining time is
//!   recomputed from timestamps on every tick, so late or missing ticks never
//!   make the countdown drift.
//! - **Timer Service**: a tokio task that owns the engine, drives a
//!   cancellable ticker and fans events out to subscribers.
//! - **Visibility Coordinator**: persists a snapshot when the host is
//!   suspended and restores it on resume.
//! - **Session Recorder**: delivers every finished interval to a ledger at
//!   least once, queueing failures for replay.
//! - **Storage**: SQLite for sessions and snapshot keys, TOML for
//!   configuration.
//!
//! ## Key Components
//!
//! - [`TimerEngine`]: core timer state machine
//! - [`TimerService`]: async owner of the engine
//! - [`VisibilityCoordinator`]: suspend/resume persistence
//! - [`SessionRecorder`]: at-least-once session delivery
//! - [`Database`]: session ledger and key-value store
//! - [`Config`]: application configuration

pub mod clock;
pub mod error;
pub mod events;
pub mod notify;
pub mod recorder;
pub mod storage;
pub mod timer;
pub mod visibility;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    ConfigError, CoreError, DatabaseError, LedgerError, NotifyError, SnapshotError,
    ValidationError,
};
pub use events::Event;
pub use notify::{CompletionSound, NotificationDispatcher, SilentSound, TerminalBell};
pub use recorder::{
    AccomplishmentPrompt, NoPrompt, RecordOutcome, ReplaySummary, RetryQueue, SessionId,
    SessionLedger, SessionRecorder,
};
pub use storage::{Config, Database, KeyValueStore, MemoryStore, SnapshotStore};
pub use timer::{
    IntervalKind, Phase, SessionRecord, TimerConfiguration, TimerEngine, TimerHandle,
    TimerService, TimerSnapshot,
};
pub use visibility::{VisibilityConfig, VisibilityCoordinator, VisibilityOutcome};
