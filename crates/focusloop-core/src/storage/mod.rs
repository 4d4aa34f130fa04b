mod config;
pub mod database;
pub mod kv;
pub mod snapshot;

pub use config::{Config, NotificationsConfig, TimerSection, VisibilitySection};
pub use database::{Database, StoredSession};
pub use kv::{KeyValueStore, MemoryStore};
pub use snapshot::{SnapshotStore, KEY_END_TIMESTAMP, KEY_REVISION, KEY_STATE};

use std::path::PathBuf;

/// Returns `~/.config/focusloop[-dev]/` based on FOCUSLOOP_ENV.
///
/// Set FOCUSLOOP_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("FOCUSLOOP_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("focusloop-dev")
    } else {
        base_dir.join("focusloop")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
