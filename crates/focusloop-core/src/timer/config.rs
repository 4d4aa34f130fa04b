use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Kind of interval a session record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalKind {
    Focus,
    Break,
}

impl IntervalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IntervalKind::Focus => "focus",
            IntervalKind::Break => "break",
        }
    }
}

/// Per-run timer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerConfiguration {
    pub focus_duration_secs: u64,
    pub break_duration_secs: u64,
    pub long_break_duration_secs: u64,
    /// Focus sessions after which a long break is taken.
    pub long_break_interval: u32,
}

impl TimerConfiguration {
    /// Build a validated configuration.
    ///
    /// # Errors
    /// Returns an error if any duration is zero or `long_break_interval` is zero.
    pub fn new(
        focus_duration_secs: u64,
        break_duration_secs: u64,
        long_break_duration_secs: u64,
        long_break_interval: u32,
    ) -> Result<Self, ValidationError> {
        let cfg = Self {
            focus_duration_secs,
            break_duration_secs,
            long_break_duration_secs,
            long_break_interval,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let durations = [
            ("focus_duration_secs", self.focus_duration_secs),
            ("break_duration_secs", self.break_duration_secs),
            ("long_break_duration_secs", self.long_break_duration_secs),
        ];
        for (field, secs) in durations {
            if secs == 0 {
                return Err(ValidationError::InvalidValue {
                    field: field.into(),
                    message: "must be at least one second".into(),
                });
            }
        }
        if self.long_break_interval == 0 {
            return Err(ValidationError::InvalidValue {
                field: "long_break_interval".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Focus duration in milliseconds.
    ///
    /// Uses saturating arithmetic to prevent overflow with large values.
    pub fn focus_ms(&self) -> u64 {
        self.focus_duration_secs.saturating_mul(1000)
    }

    /// Length of the break that follows focus session `session_index`.
    pub fn break_ms_after(&self, session_index: u32) -> u64 {
        let secs = if self.is_long_break(session_index) {
            self.long_break_duration_secs
        } else {
            self.break_duration_secs
        };
        secs.saturating_mul(1000)
    }

    pub fn is_long_break(&self, session_index: u32) -> bool {
        self.long_break_interval > 0 && session_index % self.long_break_interval == 0
    }
}

impl Default for TimerConfiguration {
    fn default() -> Self {
        Self {
            focus_duration_secs: 25 * 60,
            break_duration_secs: 5 * 60,
            long_break_duration_secs: 15 * 60,
            long_break_interval: 4,
        }
    }
}
