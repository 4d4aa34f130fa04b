//! Session recording with at-least-once delivery.
//!
//! Every finished interval becomes one [`SessionRecord`] handed to an
//! external [`SessionLedger`]. If the ledger is unreachable the record goes to
//! a durable [`RetryQueue`] and is replayed later; it is never dropped.
//! Completed focus intervals additionally trigger a one-shot accomplishment
//! capture request once the ledger has assigned them an id.

mod retry_queue;

pub use retry_queue::{PendingRecord, RetryQueue};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::timer::{IntervalKind, SessionRecord};

/// Identifier the ledger assigns to a stored session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The external store of finished sessions.
pub trait SessionLedger: Send {
    fn save_session(&mut self, record: &SessionRecord) -> Result<SessionId, LedgerError>;
}

/// Asks the user what they got done during a focus interval.
pub trait AccomplishmentPrompt: Send {
    fn request_accomplishment_capture(&mut self, session_id: &SessionId);
}

/// Prompt that does nothing, for hosts without a capture step.
#[derive(Debug, Default)]
pub struct NoPrompt;

impl AccomplishmentPrompt for NoPrompt {
    fn request_accomplishment_capture(&mut self, _session_id: &SessionId) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Saved(SessionId),
    /// Ledger failed; the record is waiting in the retry queue.
    Queued,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub delivered: usize,
    pub remaining: usize,
}

pub struct SessionRecorder<L, P> {
    ledger: L,
    prompt: P,
    queue: RetryQueue,
}

impl<L: SessionLedger, P: AccomplishmentPrompt> SessionRecorder<L, P> {
    pub fn new(ledger: L, prompt: P, queue: RetryQueue) -> Self {
        Self {
            ledger,
            prompt,
            queue,
        }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    pub fn queue(&self) -> &RetryQueue {
        &self.queue
    }

    pub fn record(
        &mut self,
        kind: IntervalKind,
        activity_label: &str,
        completed: bool,
        duration_secs: u64,
        started_at: DateTime<Utc>,
    ) -> RecordOutcome {
        self.submit(SessionRecord {
            started_at,
            duration_secs,
            kind,
            completed,
            activity_label: activity_label.to_string(),
        })
    }

    /// Deliver a record, queueing it for retry when the ledger fails.
    pub fn submit(&mut self, record: SessionRecord) -> RecordOutcome {
        let wants_capture = record.kind == IntervalKind::Focus && record.completed;
        match self.ledger.save_session(&record) {
            Ok(id) => {
                info!(session_id = %id, kind = record.kind.as_str(), "session recorded");
                if wants_capture {
                    self.prompt.request_accomplishment_capture(&id);
                }
                RecordOutcome::Saved(id)
            }
            Err(e) => {
                warn!(error = %e, "ledger save failed, queueing session for retry");
                self.queue.push(PendingRecord {
                    id: Uuid::new_v4(),
                    record,
                    wants_capture,
                    attempts: 1,
                    last_error: e.to_string(),
                    queued_at: Utc::now(),
                });
                self.persist_queue();
                RecordOutcome::Queued
            }
        }
    }

    /// Retry every queued record, oldest first.
    ///
    /// Records that still fail stay queued.
    pub fn replay_pending(&mut self) -> ReplaySummary {
        let mut summary = ReplaySummary::default();
        if self.queue.is_empty() {
            return summary;
        }

        for mut pending in self.queue.take_all() {
            match self.ledger.save_session(&pending.record) {
                Ok(id) => {
                    summary.delivered += 1;
                    if pending.wants_capture {
                        self.prompt.request_accomplishment_capture(&id);
                    }
                }
                Err(e) => {
                    pending.attempts += 1;
                    pending.last_error = e.to_string();
                    self.queue.push(pending);
                }
            }
        }
        summary.remaining = self.queue.len();
        info!(
            delivered = summary.delivered,
            remaining = summary.remaining,
            "replayed queued sessions"
        );
        self.persist_queue();
        summary
    }

    fn persist_queue(&self) {
        if let Err(e) = self.queue.persist() {
            warn!(error = %e, "could not persist session retry queue");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct FlakyLedger {
        online: Arc<Mutex<bool>>,
        saved: Arc<Mutex<Vec<SessionRecord>>>,
    }

    impl SessionLedger for FlakyLedger {
        fn save_session(&mut self, record: &SessionRecord) -> Result<SessionId, LedgerError> {
            if !*self.online.lock().unwrap() {
                return Err(LedgerError::Unavailable("offline".into()));
            }
            let mut saved = self.saved.lock().unwrap();
            saved.push(record.clone());
            Ok(SessionId(format!("s{}", saved.len())))
        }
    }

    #[derive(Clone, Default)]
    struct Captures(Arc<Mutex<Vec<SessionId>>>);

    impl AccomplishmentPrompt for Captures {
        fn request_accomplishment_capture(&mut self, session_id: &SessionId) {
            self.0.lock().unwrap().push(session_id.clone());
        }
    }

    fn recorder(online: bool) -> (SessionRecorder<FlakyLedger, Captures>, FlakyLedger, Captures) {
        let ledger = FlakyLedger::default();
        *ledger.online.lock().unwrap() = online;
        let captures = Captures::default();
        let recorder =
            SessionRecorder::new(ledger.clone(), captures.clone(), RetryQueue::in_memory());
        (recorder, ledger, captures)
    }

    #[test]
    fn completed_focus_requests_capture_once() {
        let (mut recorder, ledger, captures) = recorder(true);
        let outcome = recorder.record(IntervalKind::Focus, "essay", true, 1500, Utc::now());
        assert_eq!(outcome, RecordOutcome::Saved(SessionId("s1".into())));
        recorder.record(IntervalKind::Break, "essay", true, 300, Utc::now());
        recorder.record(IntervalKind::Focus, "essay", false, 60, Utc::now());

        assert_eq!(ledger.saved.lock().unwrap().len(), 3);
        assert_eq!(*captures.0.lock().unwrap(), vec![SessionId("s1".into())]);
    }

    #[test]
    fn failures_are_queued_and_replayed() {
        let (mut recorder, ledger, captures) = recorder(false);
        assert_eq!(
            recorder.record(IntervalKind::Focus, "", true, 1500, Utc::now()),
            RecordOutcome::Queued
        );
        assert_eq!(recorder.queue().len(), 1);
        assert!(captures.0.lock().unwrap().is_empty());

        let summary = recorder.replay_pending();
        assert_eq!(summary, ReplaySummary { delivered: 0, remaining: 1 });
        assert_eq!(recorder.queue().pending()[0].attempts, 2);

        *ledger.online.lock().unwrap() = true;
        let summary = recorder.replay_pending();
        assert_eq!(summary, ReplaySummary { delivered: 1, remaining: 0 });
        assert_eq!(ledger.saved.lock().unwrap().len(), 1);
        assert_eq!(captures.0.lock().unwrap().len(), 1);

        assert_eq!(recorder.replay_pending(), ReplaySummary::default());
        assert_eq!(captures.0.lock().unwrap().len(), 1);
    }
}
