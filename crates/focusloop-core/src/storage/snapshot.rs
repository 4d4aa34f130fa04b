//! Snapshot persistence under fixed keys.
//!
//! Layout:
//! - `timer.snapshot.endTimestamp`: epoch ms at which the running interval
//!   ends. Present only while running outside `Idle`.
//! - `timer.snapshot.state`: the rest of the snapshot as JSON. Remaining time
//!   is derived from the end timestamp, except for paused snapshots which
//!   carry it as `pausedRemainingMs`.
//! - `timer.snapshot.revision`: monotonic revision for optimistic writes.
//!   A writer only commits if the revision it last observed is still current.

use serde::{Deserialize, Serialize};

use super::kv::{Applied, KeyValueStore};
use crate::error::SnapshotError;
use crate::timer::{Phase, TimerSnapshot};

pub const KEY_END_TIMESTAMP: &str = "timer.snapshot.endTimestamp";
pub const KEY_STATE: &str = "timer.snapshot.state";
pub const KEY_REVISION: &str = "timer.snapshot.revision";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedState {
    phase: Phase,
    running: bool,
    session_index: u32,
    #[serde(default)]
    total_sessions: u32,
    #[serde(default)]
    activity_label: String,
    session_start_timestamp: Option<u64>,
    #[serde(default)]
    active_ms: u64,
    suspended_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    paused_remaining_ms: Option<u64>,
}

/// Reads and writes [`TimerSnapshot`]s through a [`KeyValueStore`].
#[derive(Debug)]
pub struct SnapshotStore<S> {
    store: S,
}

impl<S: KeyValueStore> SnapshotStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    /// Current committed revision; 0 when nothing was ever written.
    pub fn revision(&self) -> Result<u64, SnapshotError> {
        parse_revision(self.store.get(KEY_REVISION)?.as_deref())
    }

    /// Write `snapshot` if `expected_revision` is still current.
    ///
    /// Returns the new revision.
    pub fn save(
        &self,
        snapshot: &TimerSnapshot,
        expected_revision: u64,
    ) -> Result<u64, SnapshotError> {
        let next = expected_revision + 1;
        let state = PersistedState {
            phase: snapshot.phase,
            running: snapshot.running,
            session_index: snapshot.session_index,
            total_sessions: snapshot.total_sessions,
            activity_label: snapshot.activity_label.clone(),
            session_start_timestamp: snapshot.session_start_ms,
            active_ms: snapshot.active_ms,
            suspended_at: snapshot.taken_at_ms,
            paused_remaining_ms: (!snapshot.running).then_some(snapshot.remaining_ms),
        };
        let state_json =
            serde_json::to_string(&state).map_err(|e| SnapshotError::Store(e.to_string()))?;
        let revision = next.to_string();

        if snapshot.running && snapshot.phase != Phase::Idle {
            let end = snapshot.taken_at_ms.saturating_add(snapshot.remaining_ms);
            let end = end.to_string();
            self.commit_if_current(
                expected_revision,
                &[
                    (KEY_STATE, state_json.as_str()),
                    (KEY_END_TIMESTAMP, end.as_str()),
                    (KEY_REVISION, revision.as_str()),
                ],
                &[],
            )?;
        } else {
            self.commit_if_current(
                expected_revision,
                &[
                    (KEY_STATE, state_json.as_str()),
                    (KEY_REVISION, revision.as_str()),
                ],
                &[KEY_END_TIMESTAMP],
            )?;
        }
        Ok(next)
    }

    /// Load the stored snapshot together with its revision.
    ///
    /// `Ok(None)` when nothing is stored; `Err(Malformed)` when the stored
    /// keys cannot be decoded into a consistent snapshot.
    pub fn load(&self) -> Result<Option<(TimerSnapshot, u64)>, SnapshotError> {
        let Some(raw) = self.store.get(KEY_STATE)? else {
            return Ok(None);
        };
        let state: PersistedState = serde_json::from_str(&raw)
            .map_err(|e| SnapshotError::Malformed(format!("state: {e}")))?;
        let revision = self.revision()?;

        let remaining_ms = match (state.phase, state.running) {
            (Phase::Idle, _) => 0,
            (_, true) => {
                let end = self
                    .store
                    .get(KEY_END_TIMESTAMP)?
                    .ok_or_else(|| {
                        SnapshotError::Malformed("running snapshot without end timestamp".into())
                    })?;
                let end = end
                    .trim()
                    .parse::<u64>()
                    .map_err(|e| SnapshotError::Malformed(format!("end timestamp: {e}")))?;
                end.checked_sub(state.suspended_at).ok_or_else(|| {
                    SnapshotError::Malformed(format!(
                        "end timestamp {end} precedes suspension at {}",
                        state.suspended_at
                    ))
                })?
            }
            (_, false) => state.paused_remaining_ms.ok_or_else(|| {
                SnapshotError::Malformed("paused snapshot without remaining time".into())
            })?,
        };

        let snapshot = TimerSnapshot {
            phase: state.phase,
            running: state.running && state.phase != Phase::Idle,
            remaining_ms,
            session_index: state.session_index.max(1),
            total_sessions: state.total_sessions,
            activity_label: state.activity_label,
            session_start_ms: state.session_start_timestamp,
            active_ms: state.active_ms,
            taken_at_ms: state.suspended_at,
        };
        Ok(Some((snapshot, revision)))
    }

    /// Delete the snapshot if `expected_revision` is still current.
    pub fn clear(&self, expected_revision: u64) -> Result<u64, SnapshotError> {
        let next = expected_revision + 1;
        let revision = next.to_string();
        self.commit_if_current(
            expected_revision,
            &[(KEY_REVISION, revision.as_str())],
            &[KEY_STATE, KEY_END_TIMESTAMP],
        )?;
        Ok(next)
    }

    /// Delete the snapshot regardless of revision. Used to discard garbage.
    pub fn discard(&self) -> Result<u64, SnapshotError> {
        let next = self.revision().unwrap_or(0) + 1;
        self.force_clear_at(next)?;
        Ok(next)
    }

    fn force_clear_at(&self, revision: u64) -> Result<(), SnapshotError> {
        let revision = revision.to_string();
        self.store.apply(
            &[(KEY_REVISION, revision.as_str())],
            &[KEY_STATE, KEY_END_TIMESTAMP],
        )?;
        Ok(())
    }

    /// Apply the batch only if the stored revision still equals `expected`.
    /// The check and the writes are one atomic step in the store.
    fn commit_if_current(
        &self,
        expected: u64,
        writes: &[(&str, &str)],
        removals: &[&str],
    ) -> Result<(), SnapshotError> {
        let current = |raw: Option<&str>| parse_revision(raw).ok() == Some(expected);
        match self.store.apply_if(KEY_REVISION, &current, writes, removals)? {
            Applied::Committed => Ok(()),
            Applied::Rejected { found } => Err(SnapshotError::Conflict {
                expected,
                found: parse_revision(found.as_deref())?,
            }),
        }
    }
}

fn parse_revision(raw: Option<&str>) -> Result<u64, SnapshotError> {
    match raw {
        None => Ok(0),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| SnapshotError::Malformed(format!("revision '{raw}': {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DatabaseError;
    use crate::storage::kv::{Guard, MemoryStore};
    use std::sync::Mutex;

    type Hook = Box<dyn FnOnce() + Send>;

    /// Runs `hook` right before the first guarded commit, standing in for
    /// another process that writes between our decision and our commit.
    struct RacingStore {
        inner: MemoryStore,
        hook: Mutex<Option<Hook>>,
    }

    impl KeyValueStore for RacingStore {
        fn get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), DatabaseError> {
            self.inner.remove(key)
        }

        fn apply_if(
            &self,
            guard_key: &str,
            accept: Guard<'_>,
            writes: &[(&str, &str)],
            removals: &[&str],
        ) -> Result<Applied, DatabaseError> {
            if let Some(hook) = self.hook.lock().unwrap().take() {
                hook();
            }
            self.inner.apply_if(guard_key, accept, writes, removals)
        }
    }

    fn running_snapshot() -> TimerSnapshot {
        TimerSnapshot {
            phase: Phase::Focus,
            running: true,
            remaining_ms: 1_490_000,
            session_index: 2,
            total_sessions: 1,
            activity_label: "reading".into(),
            session_start_ms: Some(100_000),
            active_ms: 10_000,
            taken_at_ms: 110_000,
        }
    }

    #[test]
    fn running_snapshot_uses_end_timestamp() {
        let store = SnapshotStore::new(MemoryStore::new());
        let rev = store.save(&running_snapshot(), 0).unwrap();
        assert_eq!(rev, 1);
        assert_eq!(
            store.inner().get(KEY_END_TIMESTAMP).unwrap().as_deref(),
            Some("1600000")
        );
        let state = store.inner().get(KEY_STATE).unwrap().unwrap();
        assert!(!state.contains("remaining"));

        let (loaded, rev) = store.load().unwrap().unwrap();
        assert_eq!(rev, 1);
        assert_eq!(loaded, running_snapshot());
    }

    #[test]
    fn paused_snapshot_has_no_end_timestamp() {
        let store = SnapshotStore::new(MemoryStore::new());
        store.save(&running_snapshot(), 0).unwrap();
        let paused = TimerSnapshot {
            running: false,
            ..running_snapshot()
        };
        store.save(&paused, 1).unwrap();
        assert!(store.inner().get(KEY_END_TIMESTAMP).unwrap().is_none());
        let (loaded, _) = store.load().unwrap().unwrap();
        assert_eq!(loaded.remaining_ms, 1_490_000);
        assert!(!loaded.running);
    }

    #[test]
    fn stale_writer_gets_conflict() {
        let shared = MemoryStore::new();
        let tab_a = SnapshotStore::new(shared.clone());
        let tab_b = SnapshotStore::new(shared);

        tab_a.save(&running_snapshot(), 0).unwrap();
        let err = tab_b.save(&running_snapshot(), 0).unwrap_err();
        assert!(matches!(err, SnapshotError::Conflict { expected: 0, found: 1 }));
        assert!(tab_b.clear(0).is_err());
        assert!(tab_b.clear(1).is_ok());
    }

    #[test]
    fn writer_interleaved_before_commit_wins() {
        let shared = MemoryStore::new();
        let other = shared.clone();
        let tab_a = SnapshotStore::new(RacingStore {
            inner: shared.clone(),
            hook: Mutex::new(Some(Box::new(move || {
                let tab_b = SnapshotStore::new(other);
                let snap_b = TimerSnapshot {
                    activity_label: "tab B".into(),
                    ..running_snapshot()
                };
                assert_eq!(tab_b.save(&snap_b, 0).unwrap(), 1);
            }))),
        });

        let snap_a = TimerSnapshot {
            activity_label: "tab A".into(),
            ..running_snapshot()
        };
        let err = tab_a.save(&snap_a, 0).unwrap_err();
        assert!(matches!(err, SnapshotError::Conflict { expected: 0, found: 1 }));

        let (stored, rev) = SnapshotStore::new(shared).load().unwrap().unwrap();
        assert_eq!(stored.activity_label, "tab B");
        assert_eq!(rev, 1);
    }

    #[test]
    fn end_before_suspension_is_malformed() {
        let store = SnapshotStore::new(MemoryStore::new());
        store.save(&running_snapshot(), 0).unwrap();
        store.inner().set(KEY_END_TIMESTAMP, "0").unwrap();
        assert!(matches!(store.load(), Err(SnapshotError::Malformed(_))));
    }

    #[test]
    fn missing_end_timestamp_is_malformed() {
        let store = SnapshotStore::new(MemoryStore::new());
        store.save(&running_snapshot(), 0).unwrap();
        store.inner().remove(KEY_END_TIMESTAMP).unwrap();
        assert!(matches!(store.load(), Err(SnapshotError::Malformed(_))));
    }

    #[test]
    fn garbage_state_is_malformed() {
        let store = SnapshotStore::new(MemoryStore::new());
        store.inner().set(KEY_STATE, "{not json").unwrap();
        assert!(matches!(store.load(), Err(SnapshotError::Malformed(_))));
        store.discard().unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn clear_removes_keys_and_bumps_revision() {
        let store = SnapshotStore::new(MemoryStore::new());
        store.save(&running_snapshot(), 0).unwrap();
        assert_eq!(store.clear(1).unwrap(), 2);
        assert!(store.load().unwrap().is_none());
        assert_eq!(store.revision().unwrap(), 2);
    }
}
