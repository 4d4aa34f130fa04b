//! Suspend/resume coordination.
//!
//! When the host goes to the background, ticks stop arriving. Rather than
//! catching up missed ticks, the coordinator persists a snapshot at the
//! suspend boundary and lets the engine reconcile elapsed wall-clock time in
//! one step on resume. Nothing here ever returns an error to the caller:
//! failures are logged and surface as a [`VisibilityOutcome`].

use tracing::{debug, info, warn};

use crate::error::SnapshotError;
use crate::events::Event;
use crate::storage::{KeyValueStore, SnapshotStore};
use crate::timer::{Phase, TimerEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibilityConfig {
    /// Signals closer than this to the previous accepted signal are dropped.
    pub debounce_ms: u64,
    /// Persist paused (not just running) timers.
    pub persist_paused: bool,
}

impl Default for VisibilityConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            persist_paused: false,
        }
    }
}

/// What a suspend/resume signal ended up doing.
#[derive(Debug, Clone, PartialEq)]
pub enum VisibilityOutcome {
    /// Signal arrived inside the debounce window and was ignored.
    Debounced,
    /// Nothing needed persisting.
    Skipped,
    Saved { revision: u64 },
    Cleared { revision: u64 },
    /// The engine was rebuilt from the stored snapshot.
    Restored(Event),
    NoSnapshot,
    /// A stored snapshot could not be decoded and was thrown away.
    Discarded,
    /// Another instance committed a newer snapshot.
    Conflict { found: u64 },
    Failed(String),
}

pub struct VisibilityCoordinator<S> {
    store: SnapshotStore<S>,
    config: VisibilityConfig,
    last_signal_ms: Option<u64>,
    /// Revision this instance last wrote or read.
    revision: u64,
}

impl<S: KeyValueStore> VisibilityCoordinator<S> {
    pub fn new(store: S, config: VisibilityConfig) -> Self {
        let store = SnapshotStore::new(store);
        let revision = store.revision().unwrap_or_else(|e| {
            warn!(error = %e, "could not read snapshot revision");
            0
        });
        Self {
            store,
            config,
            last_signal_ms: None,
            revision,
        }
    }

    pub fn store(&self) -> &SnapshotStore<S> {
        &self.store
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Host went to the background.
    pub fn on_suspend(&mut self, engine: &TimerEngine) -> VisibilityOutcome {
        if self.debounced(engine.now_ms()) {
            return VisibilityOutcome::Debounced;
        }
        if !self.should_persist(engine) {
            debug!("suspend with nothing to persist");
            return VisibilityOutcome::Skipped;
        }
        self.persist(engine)
    }

    /// Host came back to the foreground.
    ///
    /// Missing snapshots leave the engine untouched. Snapshots that cannot be
    /// decoded, or whose interval does not fit the engine's configuration,
    /// are discarded without touching the engine.
    pub fn on_resume(&mut self, engine: &mut TimerEngine) -> VisibilityOutcome {
        let now = engine.now_ms();
        if self.debounced(now) {
            return VisibilityOutcome::Debounced;
        }

        let (snapshot, revision) = match self.store.load() {
            Ok(Some(found)) => found,
            Ok(None) => {
                // Adopt the revision left by whoever cleared it.
                if let Ok(revision) = self.store.revision() {
                    self.revision = revision;
                }
                return VisibilityOutcome::NoSnapshot;
            }
            Err(SnapshotError::Malformed(reason)) => return self.discard(&reason),
            Err(e) => return self.failed(e),
        };
        if let Err(reason) = snapshot.validate(engine.config()) {
            return self.discard(&reason);
        }

        self.revision = revision;
        let event = engine.restore(&snapshot, now);

        match self.store.clear(self.revision) {
            Ok(revision) => self.revision = revision,
            Err(e) => warn!(error = %e, "could not delete consumed snapshot"),
        }
        VisibilityOutcome::Restored(event)
    }

    /// Keep the stored snapshot in step with an engine transition.
    ///
    /// Transitions into running write the snapshot; transitions that end in a
    /// non-running state delete it.
    pub fn sync_after(&mut self, engine: &TimerEngine, event: &Event) -> Option<VisibilityOutcome> {
        match event {
            Event::TimerStarted { .. }
            | Event::TimerPaused { .. }
            | Event::TimerReset { .. }
            | Event::IntervalCompleted { .. }
            | Event::ConfigurationUpdated { .. } => Some(self.checkpoint(engine)),
            _ => None,
        }
    }

    /// Write the snapshot if the engine warrants one, otherwise delete it.
    pub fn checkpoint(&mut self, engine: &TimerEngine) -> VisibilityOutcome {
        if self.should_persist(engine) {
            self.persist(engine)
        } else {
            self.clear()
        }
    }

    /// Write the engine snapshot now, bypassing the debounce window.
    pub fn persist(&mut self, engine: &TimerEngine) -> VisibilityOutcome {
        let snapshot = engine.snapshot();
        match self.store.save(&snapshot, self.revision) {
            Ok(revision) => {
                self.revision = revision;
                debug!(revision, phase = ?snapshot.phase, "timer snapshot saved");
                VisibilityOutcome::Saved { revision }
            }
            Err(e) => self.failed(e),
        }
    }

    fn clear(&mut self) -> VisibilityOutcome {
        match self.store.clear(self.revision) {
            Ok(revision) => {
                self.revision = revision;
                VisibilityOutcome::Cleared { revision }
            }
            Err(e) => self.failed(e),
        }
    }

    fn discard(&mut self, reason: &str) -> VisibilityOutcome {
        warn!(%reason, "discarding malformed timer snapshot");
        match self.store.discard() {
            Ok(revision) => {
                self.revision = revision;
                VisibilityOutcome::Discarded
            }
            Err(e) => self.failed(e),
        }
    }

    fn should_persist(&self, engine: &TimerEngine) -> bool {
        engine.is_running() || (self.config.persist_paused && engine.phase() != Phase::Idle)
    }

    fn debounced(&mut self, now: u64) -> bool {
        if let Some(last) = self.last_signal_ms {
            if now.saturating_sub(last) < self.config.debounce_ms && now >= last {
                debug!(since_last_ms = now - last, "debouncing visibility signal");
                return true;
            }
        }
        self.last_signal_ms = Some(now);
        false
    }

    fn failed(&self, error: SnapshotError) -> VisibilityOutcome {
        match error {
            SnapshotError::Conflict { found, .. } => {
                info!(
                    held = self.revision,
                    found, "another instance owns the timer snapshot"
                );
                VisibilityOutcome::Conflict { found }
            }
            other => {
                warn!(error = %other, "timer snapshot persistence failed");
                VisibilityOutcome::Failed(other.to_string())
            }
        }
    }
}
