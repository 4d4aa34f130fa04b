mod config;
mod engine;
mod record;
mod remaining;
mod service;
mod ticker;

pub use config::{IntervalKind, TimerConfiguration};
pub use engine::{Phase, TimerEngine, TimerSnapshot};
pub use record::SessionRecord;
pub use remaining::{compute_remaining, display_secs};
pub use service::{TimerHandle, TimerService, DEFAULT_TICK_PERIOD};
pub use ticker::Ticker;
