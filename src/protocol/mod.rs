//! # AirWater Command Protocol
//!
//! Wire format of the signed JSON envelopes exchanged with AirWater devices over
//! MQTT. Everything in here is pure: no I/O, no clocks. Callers pass the unix
//! timestamp in so encoding stays reproducible.
//!
//! ```text
//! protocol/
//! ├── command.rs   - Command ids understood by the firmware
//! ├── envelope.rs  - Envelope encode (sign) / decode
//! ├── fields.rs    - Typed readers for payload fields (sentinels, ranges)
//! └── error.rs     - Codec error taxonomy
//! ```
//!
//! ## Signing
//!
//! The firmware checks `sig = md5(<envelope json without braces> + "," + key)`,
//! computed over the compact serialization of `{cmdId, time, data}`. The exact
//! text matters, so payload keys keep their insertion order.

pub mod command;
pub mod envelope;
pub mod error;
pub mod fields;

pub use command::CommandId;
pub use envelope::{decode, encode, sign, verify_signature, CommandData, CommandEnvelope};
pub use error::CodecError;

/// Topic the device publishes telemetry and acknowledgements on.
pub fn status_topic(device_id: u32) -> String {
    format!("airwater/01/0/1/1/{}", device_id)
}

/// Topic the device listens for commands on.
pub fn command_topic(device_id: u32) -> String {
    format!("airwater/01/1/0/1/{}", device_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_follow_device_layout() {
        assert_eq!(status_topic(4711), "airwater/01/0/1/1/4711");
        assert_eq!(command_topic(4711), "airwater/01/1/0/1/4711");
    }
}
