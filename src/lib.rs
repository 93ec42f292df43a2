//! # AirWater
//!
//! Local control of AirWater humidifiers: signed MQTT commands, per-device state
//! reconciliation, keep-alive scheduling and BLE Wi-Fi provisioning.
//!
//! ```text
//! src/
//! ├── protocol/      - Envelope codec and signatures
//! ├── device/        - Models, state engine, keep-alive, running sessions
//! ├── mqtt/          - Transport trait and the rumqttc implementation
//! ├── persistence/   - Settings stores with debounced writes
//! ├── provisioning/  - BLE credential handshake
//! ├── registration   - Registration records and BLE correlation
//! ├── registry       - Running sessions by device id
//! └── config         - TOML application config
//! ```

pub mod config;
pub mod device;
pub mod mqtt;
pub mod persistence;
pub mod protocol;
pub mod provisioning;
pub mod registration;
pub mod registry;
