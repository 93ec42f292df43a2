//! # AirWater Devices
//!
//! Everything about a single humidifier once it is on the network.
//!
//! ```text
//! device/
//! ├── model.rs       - Models, capability flags, identity
//! ├── status.rs      - Volatile status decoded from STATUS_INFO
//! ├── settings.rs    - Persisted settings and SET payloads
//! ├── engine.rs      - Reconciliation of inbound envelopes, outbound commands
//! ├── keep_alive.rs  - GET_STATUS scheduling
//! ├── session.rs     - Running device: actor task and intent API
//! └── error.rs       - Session error taxonomy
//! ```
//!
//! The engine is pure state; the session owns the I/O. Status is rebuilt from
//! every report, settings are patched and persisted when they change.

pub mod engine;
pub mod error;
pub mod keep_alive;
pub mod model;
pub mod session;
pub mod settings;
pub mod status;

pub use engine::{DeviceStateEngine, Reconciliation, AVAILABILITY_TIMEOUT};
pub use error::DeviceError;
pub use keep_alive::{KeepAliveScheduler, KeepAliveTrigger, KEEP_ALIVE_INTERVAL};
pub use model::{capabilities_for, Capabilities, DeviceIdentity, DeviceModel, Endpoint};
pub use session::{AirWaterDevice, DeviceSnapshot, Diagnostics, SessionOptions};
pub use settings::{DeviceSettings, SettingsChanges, WaterType};
pub use status::{DeviceStatus, OperatingMode, StatusChanges};
