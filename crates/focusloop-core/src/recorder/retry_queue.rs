//! Durable queue of session records the ledger has not accepted yet.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::timer::SessionRecord;

/// A record waiting for redelivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRecord {
    pub id: Uuid,
    pub record: SessionRecord,
    /// Request accomplishment capture once the ledger accepts it.
    pub wants_capture: bool,
    pub attempts: u32,
    pub last_error: String,
    pub queued_at: DateTime<Utc>,
}

/// Append-on-failure queue persisted as JSON.
///
/// Order of arrival is kept so replay delivers oldest first.
#[derive(Debug)]
pub struct RetryQueue {
    pending: Vec<PendingRecord>,
    /// Persistent queue file path. `None` keeps the queue in memory only.
    queue_file: Option<PathBuf>,
}

impl RetryQueue {
    /// Empty queue persisted at `path`. Does not read an existing file; use
    /// [`RetryQueue::open`] to pick up leftovers.
    pub fn new_with_path(path: PathBuf) -> Self {
        Self {
            pending: Vec::new(),
            queue_file: Some(path),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            pending: Vec::new(),
            queue_file: None,
        }
    }

    /// Open the queue at `path`, loading anything left from a previous run.
    pub fn open(path: &Path) -> Result<Self, std::io::Error> {
        let mut queue = Self::new_with_path(path.to_path_buf());
        queue.load()?;
        Ok(queue)
    }

    pub fn push(&mut self, pending: PendingRecord) {
        self.pending.push(pending);
    }

    /// Remove and return every queued record, oldest first.
    pub fn take_all(&mut self) -> Vec<PendingRecord> {
        std::mem::take(&mut self.pending)
    }

    pub fn pending(&self) -> &[PendingRecord] {
        &self.pending
    }

    /// Get number of pending records.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if queue is empty.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Persist queue to disk.
    pub fn persist(&self) -> Result<(), std::io::Error> {
        let Some(path) = &self.queue_file else {
            return Ok(());
        };
        if self.pending.is_empty() {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
            return Ok(());
        }
        let data = serde_json::to_string_pretty(&self.pending)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load queue from disk.
    pub fn load(&mut self) -> Result<(), std::io::Error> {
        let Some(path) = &self.queue_file else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        let content = std::fs::read_to_string(path)?;
        let loaded: Vec<PendingRecord> = serde_json::from_str(&content)?;
        self.pending = loaded;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::IntervalKind;

    fn pending(label: &str) -> PendingRecord {
        PendingRecord {
            id: Uuid::new_v4(),
            record: SessionRecord {
                started_at: Utc::now(),
                duration_secs: 1500,
                kind: IntervalKind::Focus,
                completed: true,
                activity_label: label.into(),
            },
            wants_capture: true,
            attempts: 1,
            last_error: "offline".into(),
            queued_at: Utc::now(),
        }
    }

    #[test]
    fn take_all_preserves_order() {
        let mut queue = RetryQueue::in_memory();
        queue.push(pending("first"));
        queue.push(pending("second"));
        assert_eq!(queue.len(), 2);

        let drained = queue.take_all();
        assert!(queue.is_empty());
        assert_eq!(drained[0].record.activity_label, "first");
        assert_eq!(drained[1].record.activity_label, "second");
    }

    #[test]
    fn test_persist_and_load() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("queue.json");
        let mut queue = RetryQueue::new_with_path(path.clone());
        queue.push(pending("persist-test"));
        queue.persist().unwrap();

        let queue2 = RetryQueue::open(&path).unwrap();
        assert_eq!(queue2.len(), 1);
        assert_eq!(queue2.pending()[0].record.activity_label, "persist-test");
        assert!(queue2.pending()[0].wants_capture);
    }

    #[test]
    fn persisting_empty_queue_removes_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("queue.json");
        let mut queue = RetryQueue::new_with_path(path.clone());
        queue.push(pending("x"));
        queue.persist().unwrap();
        assert!(path.exists());

        queue.take_all();
        queue.persist().unwrap();
        assert!(!path.exists());
    }
}
