use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use super::persistence_worker::{SettingsWriter, StoreAction};
use super::{SettingsStore, StoreError};
use crate::device::DeviceSettings;

/// Settings of one device stored as `<dir>/airwater_<id>.toml`.
///
/// Must be created inside a tokio runtime; the debounced writer runs as a task
/// and writes any pending snapshot when the store is dropped.
pub struct TomlSettingsStore {
    path: PathBuf,
    tx: UnboundedSender<StoreAction>,
}

impl TomlSettingsStore {
    pub fn new(dir: impl AsRef<Path>, device_id: u32) -> Self {
        let path = dir.as_ref().join(Self::file_name(device_id));
        let (tx, rx) = unbounded_channel();
        tokio::spawn(SettingsWriter::new(path.clone()).run(rx));

        Self { path, tx }
    }

    pub fn file_name(device_id: u32) -> String {
        format!("airwater_{}.toml", device_id)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for TomlSettingsStore {
    async fn load(&self) -> Result<Option<DeviceSettings>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("No saved settings at {}", self.path.display());
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        Ok(Some(toml::from_str(&content)?))
    }

    fn schedule_save(&self, settings: DeviceSettings, delay: Duration) {
        if self.tx.send(StoreAction::Save { settings, delay }).is_err() {
            error!(
                "Settings writer for {} is gone, save dropped",
                self.path.display()
            );
        }
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(StoreAction::Flush { response_tx })
            .map_err(|_| StoreError::WriterClosed)?;
        response_rx.await.map_err(|_| StoreError::WriterClosed)?
    }

    async fn remove(&self) -> Result<(), StoreError> {
        let (response_tx, response_rx) = oneshot::channel();
        match self.tx.send(StoreAction::Discard { response_tx }) {
            Ok(()) => {
                if response_rx.await.is_err() {
                    warn!("Settings writer stopped before discarding");
                }
            }
            Err(_) => warn!("Settings writer is gone, nothing to discard"),
        }

        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
