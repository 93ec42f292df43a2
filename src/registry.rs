//! Running device sessions, keyed by device id
//!
//! Owned by whoever starts the sessions (the binary's `run` command) and passed
//! down explicitly.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::device::{AirWaterDevice, DeviceError};

#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<u32, Arc<AirWaterDevice>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a running session. A session already registered under the same id is stopped.
    pub async fn insert(&self, device: AirWaterDevice) -> Arc<AirWaterDevice> {
        let id = device.identity().id;
        let device = Arc::new(device);

        let previous = self.devices.write().await.insert(id, Arc::clone(&device));
        if let Some(previous) = previous {
            warn!("Replacing running session for device {}", id);
            if let Err(err) = previous.stop().await {
                warn!("Stopping replaced session {} failed: {}", id, err);
            }
        }

        info!("Registered {}", device.name());
        device
    }

    pub async fn get(&self, id: u32) -> Option<Arc<AirWaterDevice>> {
        self.devices.read().await.get(&id).cloned()
    }

    pub async fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.devices.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    /// Stops and forgets a session. Returns whether the id was registered.
    pub async fn remove(&self, id: u32) -> Result<bool, DeviceError> {
        let Some(device) = self.devices.write().await.remove(&id) else {
            return Ok(false);
        };

        device.stop().await?;
        info!("Removed {}", device.name());
        Ok(true)
    }

    /// Like [`remove`](Self::remove), and also deletes the device's persisted settings.
    pub async fn forget(&self, id: u32) -> Result<bool, DeviceError> {
        let Some(device) = self.devices.write().await.remove(&id) else {
            return Ok(false);
        };

        device.stop().await?;
        device.remove_settings().await?;
        info!("Forgot {}", device.name());
        Ok(true)
    }

    pub async fn stop_all(&self) {
        let devices: Vec<Arc<AirWaterDevice>> = self
            .devices
            .write()
            .await
            .drain()
            .map(|(_, device)| device)
            .collect();

        for device in devices {
            if let Err(err) = device.stop().await {
                warn!("Stopping {} failed: {}", device.name(), err);
            }
        }
    }
}
