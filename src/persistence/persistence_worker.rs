use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::StoreError;
use crate::device::DeviceSettings;

macro_rules! respond {
    ($response_tx:expr, $result:expr) => {
        if $response_tx.send($result).is_err() {
            error!("Failed to send store response");
        }
    };
}

#[derive(Debug)]
pub enum StoreAction {
    Save {
        settings: DeviceSettings,
        delay: Duration,
    },
    Flush {
        response_tx: oneshot::Sender<Result<(), StoreError>>,
    },
    Discard {
        response_tx: oneshot::Sender<()>,
    },
}

/// Owns the pending snapshot of one settings file and writes it when the
/// debounce window closes.
pub struct SettingsWriter {
    path: PathBuf,
    pending: Option<DeviceSettings>,
    deadline: Option<Instant>,
}

impl SettingsWriter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            pending: None,
            deadline: None,
        }
    }

    pub async fn run(mut self, mut rx: UnboundedReceiver<StoreAction>) {
        loop {
            let deadline = self.deadline;
            let window = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                action = rx.recv() => match action {
                    Some(StoreAction::Save { settings, delay }) => {
                        self.pending = Some(settings);
                        if self.deadline.is_none() {
                            self.deadline = Some(Instant::now() + delay);
                        }
                    }
                    Some(StoreAction::Flush { response_tx }) => {
                        respond!(response_tx, self.write_pending().await);
                    }
                    Some(StoreAction::Discard { response_tx }) => {
                        self.pending = None;
                        self.deadline = None;
                        respond!(response_tx, ());
                    }
                    None => {
                        if let Err(err) = self.write_pending().await {
                            error!("Final settings save to {} failed: {}", self.path.display(), err);
                        }
                        break;
                    }
                },
                _ = window => {
                    if let Err(err) = self.write_pending().await {
                        error!("Settings save to {} failed: {}", self.path.display(), err);
                    }
                }
            }
        }

        debug!("Settings writer for {} stopped", self.path.display());
    }

    async fn write_pending(&mut self) -> Result<(), StoreError> {
        self.deadline = None;
        match self.pending.take() {
            Some(settings) => write_settings(&self.path, &settings).await,
            None => Ok(()),
        }
    }
}

/// Writes through a temporary file so a crash never leaves a truncated file behind.
pub async fn write_settings(path: &Path, settings: &DeviceSettings) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let content = toml::to_string_pretty(settings)?;
    let tmp_path = path.with_extension("toml.tmp");
    tokio::fs::write(&tmp_path, content).await?;
    tokio::fs::rename(&tmp_path, path).await?;

    info!("Saved settings to {}", path.display());
    Ok(())
}
