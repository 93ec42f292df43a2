//! Persisted device settings

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::protocol::fields::opt_int_field;
use crate::protocol::CommandData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaterType {
    Filtered,
    #[default]
    Tap,
}

impl WaterType {
    pub fn code(self) -> i64 {
        match self {
            WaterType::Filtered => 1,
            WaterType::Tap => 2,
        }
    }

    /// Cleaning cycle duration in seconds announced to the device
    pub fn cleaning_time(self) -> i64 {
        match self {
            WaterType::Filtered => 300,
            WaterType::Tap => 150,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub water_type: WaterType,
    pub target_humidity: u32,
    pub heater: bool,
    pub proximity_sensor: bool,
    pub auto_shake: bool,

    // vendor fields, meaning unknown
    pub clean_notify: bool,
    pub electrolysis: i64,
    pub electrolysis_level: i64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            water_type: WaterType::Tap,
            target_humidity: 45,
            heater: true,
            proximity_sensor: true,
            auto_shake: true,
            clean_notify: true,
            electrolysis: 0,
            electrolysis_level: 0,
        }
    }
}

impl DeviceSettings {
    /// Applies the fields present in a SET_INFO payload; absent fields keep their value.
    pub fn update_from_command_data(&self, data: &CommandData) -> Self {
        let flag = |key: &str| opt_int_field(data, key).map(|value| value != 0);

        let changes = SettingsChanges {
            water_type: None,
            target_humidity: opt_int_field(data, "hThreshold")
                .map(|value| value.clamp(0, i64::from(u32::MAX)) as u32),
            heater: flag("powerHeat"),
            proximity_sensor: flag("pirLock"),
            auto_shake: flag("autoShakeEnable"),
            clean_notify: flag("cleanNotify"),
            electrolysis: opt_int_field(data, "electrolysis"),
            electrolysis_level: opt_int_field(data, "electrolysisLevel"),
        };

        self.with_changes(&changes)
    }

    /// Settings fields pushed with a SET command
    pub fn to_command_data(&self) -> CommandData {
        let mut data = CommandData::new();
        data.insert("hThreshold".into(), json!(self.target_humidity));
        data.insert("powerHeat".into(), json!(i64::from(self.heater)));
        data.insert("pirLock".into(), json!(i64::from(self.proximity_sensor)));
        data.insert("autoShakeEnable".into(), json!(i64::from(self.auto_shake)));
        data.insert("cleanNotify".into(), json!(i64::from(self.clean_notify)));
        data.insert("electrolysis".into(), json!(self.electrolysis));
        data.insert("electrolysisLevel".into(), json!(self.electrolysis_level));
        data
    }

    pub fn with_changes(&self, changes: &SettingsChanges) -> Self {
        Self {
            water_type: changes.water_type.unwrap_or(self.water_type),
            target_humidity: changes.target_humidity.unwrap_or(self.target_humidity),
            heater: changes.heater.unwrap_or(self.heater),
            proximity_sensor: changes.proximity_sensor.unwrap_or(self.proximity_sensor),
            auto_shake: changes.auto_shake.unwrap_or(self.auto_shake),
            clean_notify: changes.clean_notify.unwrap_or(self.clean_notify),
            electrolysis: changes.electrolysis.unwrap_or(self.electrolysis),
            electrolysis_level: changes.electrolysis_level.unwrap_or(self.electrolysis_level),
        }
    }
}

/// Partial change to [`DeviceSettings`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsChanges {
    pub water_type: Option<WaterType>,
    pub target_humidity: Option<u32>,
    pub heater: Option<bool>,
    pub proximity_sensor: Option<bool>,
    pub auto_shake: Option<bool>,
    pub clean_notify: Option<bool>,
    pub electrolysis: Option<i64>,
    pub electrolysis_level: Option<i64>,
}

impl SettingsChanges {
    pub fn water_type(mut self, water_type: WaterType) -> Self {
        self.water_type = Some(water_type);
        self
    }

    pub fn target_humidity(mut self, target_humidity: u32) -> Self {
        self.target_humidity = Some(target_humidity);
        self
    }

    pub fn heater(mut self, heater: bool) -> Self {
        self.heater = Some(heater);
        self
    }

    pub fn proximity_sensor(mut self, proximity_sensor: bool) -> Self {
        self.proximity_sensor = Some(proximity_sensor);
        self
    }

    pub fn auto_shake(mut self, auto_shake: bool) -> Self {
        self.auto_shake = Some(auto_shake);
        self
    }
}
