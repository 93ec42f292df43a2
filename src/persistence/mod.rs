//! # Settings Persistence
//!
//! Device settings survive restarts; status never does. A device session only
//! talks to the [`SettingsStore`] trait:
//!
//! ```text
//! persistence/
//! ├── persistence_worker.rs  - Debounced writer task (actor)
//! ├── toml_store.rs          - One TOML file per device
//! └── memory_store.rs        - In-memory store for tests and embedding
//! ```
//!
//! Saves are debounced: the first `schedule_save` opens a window, later calls
//! within the window only replace the pending snapshot, and the latest snapshot
//! is written when the window closes.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::device::DeviceSettings;

pub mod memory_store;
pub mod persistence_worker;
pub mod toml_store;

pub use memory_store::MemorySettingsStore;
pub use toml_store::TomlSettingsStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Settings file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to parse settings file: {0}")]
    Deserialize(#[from] toml::de::Error),

    #[error("Settings writer is no longer running")]
    WriterClosed,
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Previously saved settings, `None` if nothing was saved yet.
    async fn load(&self) -> Result<Option<DeviceSettings>, StoreError>;

    /// Queues `settings` for saving after `delay`; the latest snapshot wins.
    fn schedule_save(&self, settings: DeviceSettings, delay: Duration);

    /// Writes any pending snapshot now.
    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Drops pending saves and deletes the stored settings.
    async fn remove(&self) -> Result<(), StoreError>;
}
