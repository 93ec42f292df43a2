//! Application configuration
//!
//! One TOML file, by default `~/.config/airwater/config.toml`. The path can be
//! overridden with `AIRWATER_CONFIG`. Every section is optional.
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [mqtt]
//! keep_alive_secs = 30
//! reconnect_delay_secs = 5
//!
//! [storage]
//! dir = "/var/lib/airwater"
//! save_delay_secs = 10
//!
//! [provisioning]
//! scan_secs = 5
//! closing_frame = "replay_last_frame"
//!
//! [registration]
//! url = "http://a06532c7-airmx-addon/_devices"
//!
//! [[devices]]
//! id = 1234
//! model = "A3S"
//! sign_key = "..."
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn, Level};

use crate::device::{DeviceIdentity, DeviceModel, Endpoint, SessionOptions, KEEP_ALIVE_INTERVAL};
use crate::mqtt::MqttConfig;
use crate::provisioning::HandshakeOptions;

const CONFIG_DIR: &str = ".config/airwater";
const CONFIG_FILE: &str = "config.toml";
const CONFIG_ENV: &str = "AIRWATER_CONFIG";

pub const DEFAULT_MQTT_HOST: &str = "a06532c7-airmx-addon";
pub const DEFAULT_MQTT_PORT: u16 = 25883;

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub mqtt: MqttConfig,
    pub storage: StorageConfig,
    pub provisioning: ProvisioningConfig,
    pub registration: RegistrationConfig,
    pub devices: Vec<DeviceConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Unknown levels fall back to INFO.
    pub fn level(&self) -> Level {
        self.level.parse().unwrap_or_else(|_| {
            warn!("Unknown log level '{}', using info", self.level);
            Level::INFO
        })
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for `airwater_<id>.toml` settings files
    pub dir: PathBuf,
    pub save_delay_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let mut dir = get_home_dir();
        dir.push(CONFIG_DIR);
        dir.push("devices");

        Self {
            dir,
            save_delay_secs: 10,
        }
    }
}

impl StorageConfig {
    pub fn save_delay(&self) -> Duration {
        Duration::from_secs(self.save_delay_secs)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ProvisioningConfig {
    pub scan_secs: u64,
    #[serde(flatten)]
    pub handshake: HandshakeOptions,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            scan_secs: 5,
            handshake: HandshakeOptions::default(),
        }
    }
}

impl ProvisioningConfig {
    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_secs)
    }
}

/// Where the side-service lists registered devices
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct RegistrationConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            url: format!("http://{}/_devices", DEFAULT_MQTT_HOST),
            timeout_secs: 10,
        }
    }
}

impl RegistrationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub id: u32,
    pub model: DeviceModel,
    pub sign_key: String,
    #[serde(default = "default_mqtt_host")]
    pub mqtt_host: String,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,
}

fn default_mqtt_host() -> String {
    DEFAULT_MQTT_HOST.to_string()
}

fn default_mqtt_port() -> u16 {
    DEFAULT_MQTT_PORT
}

impl DeviceConfig {
    /// Device on the default broker
    pub fn new(id: u32, model: DeviceModel, sign_key: impl Into<String>) -> Self {
        Self {
            id,
            model,
            sign_key: sign_key.into(),
            mqtt_host: default_mqtt_host(),
            mqtt_port: default_mqtt_port(),
        }
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            id: self.id,
            model: self.model,
            sign_key: self.sign_key.clone(),
            endpoint: Endpoint {
                host: self.mqtt_host.clone(),
                port: self.mqtt_port,
            },
        }
    }
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("sign_key", &"<redacted>")
            .field("mqtt_host", &self.mqtt_host)
            .field("mqtt_port", &self.mqtt_port)
            .finish()
    }
}

impl AppConfig {
    /// `AIRWATER_CONFIG` if set, the home config file otherwise.
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return PathBuf::from(path);
        }

        let mut path = get_home_dir();
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Reads the config at `path`. A missing file yields the defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            warn!("Config file {} does not exist, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

        debug!(
            "Loaded config from {} with {} devices",
            path.display(),
            config.devices.len()
        );
        Ok(config)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            keep_alive_interval: KEEP_ALIVE_INTERVAL,
            save_delay: self.storage.save_delay(),
        }
    }
}

fn get_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        warn!("No home directory found, using the working directory");
        PathBuf::from(".")
    })
}
