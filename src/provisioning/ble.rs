//! btleplug discovery and GATT link

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ProvisioningError, ShortRangeTransport};
use crate::device::DeviceModel;
use crate::registration::normalize_mac;

const NOTIFICATION_BUFFER: usize = 16;

/// An AirWater device seen while scanning
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    /// Normalized BLE MAC (`AA:BB:CC:DD:EE:FF`)
    pub address: String,
    pub model: DeviceModel,
    pub rssi: Option<i16>,
    peripheral: Peripheral,
}

impl DiscoveredDevice {
    pub fn into_transport(self) -> BtleplugTransport {
        BtleplugTransport::new(self.peripheral)
    }
}

pub async fn first_adapter() -> Result<Adapter, ProvisioningError> {
    let manager = Manager::new().await?;
    manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ProvisioningError::Transport("No BLE adapters available".into()))
}

/// Scans for `duration` and returns peripherals advertising a known model name.
pub async fn scan(duration: Duration) -> Result<Vec<DiscoveredDevice>, ProvisioningError> {
    let adapter = first_adapter().await?;

    info!("Scanning for AirWater devices for {:?}", duration);
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;
    if let Err(err) = adapter.stop_scan().await {
        warn!("Stopping BLE scan failed: {}", err);
    }

    let mut devices = Vec::new();
    for peripheral in adapter.peripherals().await? {
        let Ok(Some(properties)) = peripheral.properties().await else {
            continue;
        };
        let Some(name) = properties.local_name.as_deref() else {
            continue;
        };

        match name.parse::<DeviceModel>() {
            Ok(model) => {
                let address = normalize_mac(&properties.address.to_string());
                debug!("Found {} at {}", model, address);
                devices.push(DiscoveredDevice {
                    address,
                    model,
                    rssi: properties.rssi,
                    peripheral,
                });
            }
            Err(_) => debug!("Skipping BLE device {}", name),
        }
    }

    info!("Found {} AirWater devices", devices.len());
    Ok(devices)
}

/// GATT link to one peripheral
pub struct BtleplugTransport {
    peripheral: Peripheral,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl BtleplugTransport {
    pub fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            forwarder: Mutex::new(None),
        }
    }

    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, ProvisioningError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|characteristic| characteristic.uuid == uuid)
            .ok_or(ProvisioningError::CharacteristicNotFound(uuid))
    }
}

#[async_trait]
impl ShortRangeTransport for BtleplugTransport {
    async fn connect(&self) -> Result<(), ProvisioningError> {
        if !self.peripheral.is_connected().await? {
            self.peripheral.connect().await?;
        }
        self.peripheral.discover_services().await?;
        debug!("Connected to {}", self.peripheral.address());
        Ok(())
    }

    async fn write(
        &self,
        characteristic: Uuid,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), ProvisioningError> {
        let characteristic = self.characteristic(characteristic)?;
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        self.peripheral
            .write(&characteristic, data, write_type)
            .await?;
        Ok(())
    }

    async fn subscribe_notifications(
        &self,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Vec<u8>>, ProvisioningError> {
        let target = self.characteristic(characteristic)?;
        self.peripheral.subscribe(&target).await?;

        let mut notifications = self.peripheral.notifications().await?;
        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);

        let forwarder = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != characteristic {
                    continue;
                }
                if tx.send(notification.value).await.is_err() {
                    break;
                }
            }
            debug!("Notification forwarder for {} ended", characteristic);
        });

        if let Some(previous) = self.forwarder.lock().await.replace(forwarder) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn unsubscribe_notifications(
        &self,
        characteristic: Uuid,
    ) -> Result<(), ProvisioningError> {
        if let Some(forwarder) = self.forwarder.lock().await.take() {
            forwarder.abort();
        }
        let target = self.characteristic(characteristic)?;
        self.peripheral.unsubscribe(&target).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ProvisioningError> {
        if let Some(forwarder) = self.forwarder.lock().await.take() {
            forwarder.abort();
        }
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}
