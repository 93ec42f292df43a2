//! Registration records
//!
//! The registration side-service lists every device that ever phoned home at
//! `GET /_devices`. Records carry the id and signing key but not the model;
//! the model is learned by matching the record's BLE MAC against devices seen
//! while scanning.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::DeviceConfig;
use crate::device::DeviceModel;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Invalid registration list: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Registration service unreachable: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredDevice {
    pub id: u32,
    pub key: String,
    #[serde(default)]
    pub wifi_mac: String,
    #[serde(default)]
    pub ble_mac: String,
    #[serde(rename = "type", default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub ts: i64,
}

impl std::fmt::Debug for RegisteredDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredDevice")
            .field("id", &self.id)
            .field("key", &"<redacted>")
            .field("wifi_mac", &self.wifi_mac)
            .field("ble_mac", &self.ble_mac)
            .field("device_type", &self.device_type)
            .field("ts", &self.ts)
            .finish()
    }
}

/// Uppercase, colon separated MAC. Anything that is not 12 hex digits is only uppercased.
pub fn normalize_mac(mac: &str) -> String {
    let digits: String = mac
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect();

    if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return mac.trim().to_uppercase();
    }

    digits
        .to_uppercase()
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

/// Parses a `/_devices` response, most recent registration first.
pub fn parse_registered_devices(json: &str) -> Result<Vec<RegisteredDevice>, RegistrationError> {
    let mut devices: Vec<RegisteredDevice> = serde_json::from_str(json)?;
    for device in &mut devices {
        device.ble_mac = normalize_mac(&device.ble_mac);
        device.wifi_mac = normalize_mac(&device.wifi_mac);
    }
    devices.sort_by(|a, b| b.ts.cmp(&a.ts));

    debug!("Parsed {} registration records", devices.len());
    Ok(devices)
}

/// Fetches and parses the registration list from the side-service.
pub async fn fetch_registered_devices(
    url: &str,
    timeout: Duration,
) -> Result<Vec<RegisteredDevice>, RegistrationError> {
    info!("Fetching registered devices from {}", url);
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let body = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;

    parse_registered_devices(&body)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelatedDevice {
    pub record: RegisteredDevice,
    /// Known once the device was seen over BLE
    pub model: Option<DeviceModel>,
}

impl CorrelatedDevice {
    pub fn name(&self) -> String {
        match self.model {
            Some(model) => format!("{} ({})", self.record.ble_mac, model.human_readable()),
            None => self.record.ble_mac.clone(),
        }
    }

    /// Device entry talking to the default broker, if the model is known.
    pub fn to_device_config(&self) -> Option<DeviceConfig> {
        self.model
            .map(|model| DeviceConfig::new(self.record.id, model, self.record.key.clone()))
    }
}

/// Attaches models to records by BLE MAC. `discovered` yields `(address, model)`.
pub fn correlate<'a>(
    records: &[RegisteredDevice],
    discovered: impl IntoIterator<Item = (&'a str, DeviceModel)>,
) -> Vec<CorrelatedDevice> {
    let models: HashMap<String, DeviceModel> = discovered
        .into_iter()
        .map(|(address, model)| (normalize_mac(address), model))
        .collect();

    records
        .iter()
        .map(|record| CorrelatedDevice {
            record: record.clone(),
            model: models.get(&normalize_mac(&record.ble_mac)).copied(),
        })
        .collect()
}
