//! Device models, capability flags and the immutable device identity

use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Feature set of a model, as a small bitset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const HEATER: Capabilities = Capabilities(1);
    pub const ANION: Capabilities = Capabilities(1 << 1);
    /// Fan speed is set as a percentage
    pub const FAN_SPEED_PERCENTAGE: Capabilities = Capabilities(1 << 2);
    /// Fan speed is set in discrete steps
    pub const FAN_SPEED_STEPS: Capabilities = Capabilities(1 << 3);

    pub fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Self) -> Self::Output {
        Capabilities(self.0 | rhs.0)
    }
}

/// Known AirWater models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceModel {
    A2,
    A3,
    A3S,
    A3SV2,
    A5,
}

impl DeviceModel {
    pub const ALL: [DeviceModel; 5] = [
        DeviceModel::A2,
        DeviceModel::A3,
        DeviceModel::A3S,
        DeviceModel::A3SV2,
        DeviceModel::A5,
    ];

    /// Name the device advertises over BLE and the config stores
    pub fn name(self) -> &'static str {
        match self {
            DeviceModel::A2 => "AirWater A2",
            DeviceModel::A3 => "AirWater A3",
            DeviceModel::A3S => "AirWater A3S",
            DeviceModel::A3SV2 => "A3S_V2",
            DeviceModel::A5 => "AirWater A5",
        }
    }

    fn short_name(self) -> &'static str {
        match self {
            DeviceModel::A2 => "A2",
            DeviceModel::A3 => "A3",
            DeviceModel::A3S => "A3S",
            DeviceModel::A3SV2 => "A3S_V2",
            DeviceModel::A5 => "A5",
        }
    }

    pub fn human_readable(self) -> &'static str {
        match self {
            DeviceModel::A3SV2 => "AirWater A3S_V2 / Tion Iris",
            other => other.name(),
        }
    }

    pub fn capabilities(self) -> Capabilities {
        capabilities_for(self)
    }
}

/// Capability flags per model. Exhaustive so a new model cannot fall through silently.
pub fn capabilities_for(model: DeviceModel) -> Capabilities {
    match model {
        DeviceModel::A2 | DeviceModel::A5 => Capabilities::HEATER | Capabilities::FAN_SPEED_STEPS,
        DeviceModel::A3 | DeviceModel::A3S | DeviceModel::A3SV2 => {
            Capabilities::ANION | Capabilities::FAN_SPEED_PERCENTAGE
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown AirWater model: {0}")]
pub struct UnknownModel(pub String);

impl FromStr for DeviceModel {
    type Err = UnknownModel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        DeviceModel::ALL
            .into_iter()
            .find(|model| {
                model.name().eq_ignore_ascii_case(wanted)
                    || model.short_name().eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| UnknownModel(s.to_string()))
    }
}

impl TryFrom<String> for DeviceModel {
    type Error = UnknownModel;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeviceModel> for String {
    fn from(model: DeviceModel) -> Self {
        model.name().to_string()
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// MQTT broker address a device session talks through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// Who a device is and how to reach it. Fixed for the lifetime of a session.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub id: u32,
    pub model: DeviceModel,
    pub sign_key: String,
    pub endpoint: Endpoint,
}

impl DeviceIdentity {
    pub fn name(&self) -> String {
        format!("{} {}", self.model.name(), self.id)
    }

    pub fn capabilities(&self) -> Capabilities {
        self.model.capabilities()
    }
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("sign_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a5_has_heater_and_fan_steps() {
        let caps = capabilities_for("A5".parse().unwrap());
        assert!(caps.contains(Capabilities::HEATER));
        assert!(caps.contains(Capabilities::FAN_SPEED_STEPS));
        assert!(!caps.contains(Capabilities::ANION));
        assert!(!caps.contains(Capabilities::FAN_SPEED_PERCENTAGE));
    }

    #[test]
    fn a3_has_anion_and_fan_percentage_only() {
        let model: DeviceModel = "AirWater A3".parse().unwrap();
        assert_eq!(model, DeviceModel::A3);
        assert_eq!(
            model.capabilities(),
            Capabilities::ANION | Capabilities::FAN_SPEED_PERCENTAGE
        );
    }

    #[test]
    fn every_model_has_a_fan_speed_kind() {
        for model in DeviceModel::ALL {
            let caps = model.capabilities();
            assert!(
                caps.contains(Capabilities::FAN_SPEED_STEPS)
                    ^ caps.contains(Capabilities::FAN_SPEED_PERCENTAGE),
                "{} must have exactly one fan speed kind",
                model
            );
        }
    }

    #[test]
    fn names_parse_back() {
        for model in DeviceModel::ALL {
            assert_eq!(model.name().parse::<DeviceModel>().unwrap(), model);
        }
        assert_eq!("a3s_v2".parse::<DeviceModel>().unwrap(), DeviceModel::A3SV2);
        assert!("AirWater A9".parse::<DeviceModel>().is_err());
    }

    #[test]
    fn identity_debug_hides_key() {
        let identity = DeviceIdentity {
            id: 1,
            model: DeviceModel::A2,
            sign_key: "very-secret".into(),
            endpoint: Endpoint {
                host: "localhost".into(),
                port: 1883,
            },
        };
        assert!(!format!("{:?}", identity).contains("very-secret"));
        assert_eq!(identity.name(), "AirWater A2 1");
    }
}
