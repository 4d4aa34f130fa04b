use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::IntervalKind;

/// An immutable fact about one finished interval.
///
/// Emitted exactly once per tracked interval, either on natural completion
/// (`completed = true`) or when the interval is abandoned by a reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub started_at: DateTime<Utc>,
    /// Measured duration, never the configured length.
    pub duration_secs: u64,
    pub kind: IntervalKind,
    pub completed: bool,
    #[serde(default)]
    pub activity_label: String,
}

/// Milliseconds to whole seconds, rounded to nearest.
pub(crate) fn ms_to_secs(ms: u64) -> u64 {
    ms.saturating_add(500) / 1000
}
