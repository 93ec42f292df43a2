//! Volatile device status, rebuilt from every STATUS_INFO report

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::protocol::fields::{
    bool_field, int_field, opt_int_field, ranged_int_field, sensor_field, string_field,
};
use crate::protocol::{CodecError, CommandData};

/// Wire code the firmware reports while a fault is active
const MALFUNCTION_CODE: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OperatingMode {
    Manual,
    #[default]
    Auto,
    Sleep,
}

impl OperatingMode {
    pub fn code(self) -> i64 {
        match self {
            OperatingMode::Manual => 0,
            OperatingMode::Auto => 1,
            OperatingMode::Sleep => 2,
        }
    }

    /// Maps a wire mode code to `(mode, malfunction)`.
    ///
    /// The malfunction code is an overlay: it surfaces as `Auto` with the flag set.
    pub fn from_code(code: i64) -> Result<(OperatingMode, bool), CodecError> {
        match code {
            0 => Ok((OperatingMode::Manual, false)),
            1 => Ok((OperatingMode::Auto, false)),
            2 => Ok((OperatingMode::Sleep, false)),
            MALFUNCTION_CODE => Ok((OperatingMode::Auto, true)),
            other => Err(CodecError::InvalidField {
                field: "mode",
                value: other.to_string(),
            }),
        }
    }
}

fn clamp_u32(value: i64) -> u32 {
    value.clamp(0, i64::from(u32::MAX)) as u32
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub power: bool,
    pub mode: OperatingMode,
    pub malfunction: bool,
    pub fan_speed: u32,
    pub child_lock: bool,
    pub uv: bool,
    pub anion: bool,
    pub target_humidity: u32,
    /// 0..=120, `None` when unknown
    pub water_level: Option<u32>,
    pub internal_sensor_humidity: Option<f64>,
    pub internal_sensor_temperature: Option<f64>,
    pub remote_sensor_online: bool,
    pub remote_sensor_rssi: i32,
    pub remote_sensor_humidity: Option<f64>,
    pub remote_sensor_temperature: Option<f64>,
    pub need_cleaning: bool,
    pub heater: bool,
    pub wud: i64,
    pub firmware_version: Option<String>,

    // vendor fields, meaning unknown
    pub electrolysis: i64,
    pub wet_film: Option<i64>,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self {
            power: false,
            mode: OperatingMode::Auto,
            malfunction: false,
            fan_speed: 0,
            child_lock: false,
            uv: true,
            anion: true,
            target_humidity: 0,
            water_level: None,
            internal_sensor_humidity: None,
            internal_sensor_temperature: None,
            remote_sensor_online: false,
            remote_sensor_rssi: -100,
            remote_sensor_humidity: None,
            remote_sensor_temperature: None,
            need_cleaning: false,
            heater: false,
            wud: 0,
            firmware_version: None,
            electrolysis: 0,
            wet_film: None,
        }
    }
}

impl DeviceStatus {
    /// Decodes a STATUS_INFO payload field by field.
    pub fn from_command_data(data: &CommandData) -> Result<Self, CodecError> {
        let (mode, malfunction) = OperatingMode::from_code(int_field(data, "mode", 0))?;
        let remote_sensor_online = bool_field(data, "gooseOnline", false);

        let (remote_sensor_humidity, remote_sensor_temperature) = if remote_sensor_online {
            (sensor_field(data, "h"), sensor_field(data, "t"))
        } else {
            (None, None)
        };

        Ok(Self {
            power: bool_field(data, "power", false),
            mode,
            malfunction,
            fan_speed: clamp_u32(int_field(data, "cadr", 0)),
            child_lock: bool_field(data, "lock", false),
            uv: bool_field(data, "uv", false),
            anion: bool_field(data, "anion", false),
            target_humidity: clamp_u32(int_field(data, "hThreshold", 0)),
            water_level: ranged_int_field(data, "water", 0..=120).map(clamp_u32),
            internal_sensor_humidity: sensor_field(data, "h0"),
            internal_sensor_temperature: sensor_field(data, "t0"),
            remote_sensor_online,
            remote_sensor_rssi: int_field(data, "bleSignal", -100)
                .clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32,
            remote_sensor_humidity,
            remote_sensor_temperature,
            need_cleaning: bool_field(data, "isNeedClean", false),
            heater: bool_field(data, "powerHeatStatus", false),
            wud: int_field(data, "WUD", 0),
            firmware_version: string_field(data, "version"),
            electrolysis: int_field(data, "electrolysis", 0),
            wet_film: opt_int_field(data, "wetFilm"),
        })
    }

    /// Control fields pushed with a CONTROL command
    pub fn to_command_data(&self) -> CommandData {
        let mut data = CommandData::new();
        data.insert("power".into(), json!(i64::from(self.power)));
        data.insert("mode".into(), json!(self.mode.code()));
        data.insert("cadr".into(), json!(self.fan_speed));
        data.insert("lock".into(), json!(i64::from(self.child_lock)));
        data.insert("uv".into(), json!(i64::from(self.uv)));
        data.insert("anion".into(), json!(i64::from(self.anion)));
        data
    }

    pub fn with_changes(&self, changes: &StatusChanges) -> Self {
        let mut next = self.clone();
        if let Some(power) = changes.power {
            next.power = power;
        }
        if let Some(mode) = changes.mode {
            next.mode = mode;
        }
        if let Some(fan_speed) = changes.fan_speed {
            next.fan_speed = fan_speed;
        }
        if let Some(child_lock) = changes.child_lock {
            next.child_lock = child_lock;
        }
        if let Some(uv) = changes.uv {
            next.uv = uv;
        }
        if let Some(anion) = changes.anion {
            next.anion = anion;
        }
        next
    }

    /// Humidity of the remote sensor when it is online, else the built-in one.
    pub fn current_humidity(&self) -> Option<f64> {
        if self.remote_sensor_online {
            self.remote_sensor_humidity
        } else {
            self.internal_sensor_humidity
        }
    }
}

/// Partial change to the controllable part of [`DeviceStatus`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusChanges {
    pub power: Option<bool>,
    pub mode: Option<OperatingMode>,
    pub fan_speed: Option<u32>,
    pub child_lock: Option<bool>,
    pub uv: Option<bool>,
    pub anion: Option<bool>,
}

impl StatusChanges {
    pub fn power(mut self, power: bool) -> Self {
        self.power = Some(power);
        self
    }

    pub fn mode(mut self, mode: OperatingMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn fan_speed(mut self, fan_speed: u32) -> Self {
        self.fan_speed = Some(fan_speed);
        self
    }

    pub fn child_lock(mut self, child_lock: bool) -> Self {
        self.child_lock = Some(child_lock);
        self
    }

    pub fn uv(mut self, uv: bool) -> Self {
        self.uv = Some(uv);
        self
    }

    pub fn anion(mut self, anion: bool) -> Self {
        self.anion = Some(anion);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn data(value: Value) -> CommandData {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn malfunction_code_becomes_auto_with_flag() {
        let status = DeviceStatus::from_command_data(&data(json!({ "mode": 5 }))).unwrap();
        assert_eq!(status.mode, OperatingMode::Auto);
        assert!(status.malfunction);
    }

    #[test]
    fn regular_modes_clear_malfunction() {
        for (code, mode) in [
            (0, OperatingMode::Manual),
            (1, OperatingMode::Auto),
            (2, OperatingMode::Sleep),
        ] {
            let status = DeviceStatus::from_command_data(&data(json!({ "mode": code }))).unwrap();
            assert_eq!(status.mode, mode);
            assert!(!status.malfunction);
        }
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(matches!(
            DeviceStatus::from_command_data(&data(json!({ "mode": 9 }))),
            Err(CodecError::InvalidField { field: "mode", .. })
        ));
    }

    #[test]
    fn full_report_decodes() {
        let report = data(json!({
            "power": 1, "mode": 0, "cadr": 55, "lock": 1, "uv": 1, "anion": 0,
            "hThreshold": 50, "water": 80, "h0": 4512, "t0": 2210,
            "gooseOnline": 1, "bleSignal": -61, "h": 4300, "t": 99999,
            "isNeedClean": 0, "powerHeatStatus": 1, "WUD": 3,
            "version": "1.0.7", "electrolysis": 12, "wetFilm": 2
        }));

        let status = DeviceStatus::from_command_data(&report).unwrap();
        assert!(status.power);
        assert_eq!(status.mode, OperatingMode::Manual);
        assert_eq!(status.fan_speed, 55);
        assert!(status.child_lock);
        assert!(!status.anion);
        assert_eq!(status.target_humidity, 50);
        assert_eq!(status.water_level, Some(80));
        assert_eq!(status.internal_sensor_humidity, Some(45.12));
        assert_eq!(status.internal_sensor_temperature, Some(22.1));
        assert_eq!(status.remote_sensor_rssi, -61);
        assert_eq!(status.remote_sensor_humidity, Some(43.0));
        assert_eq!(status.remote_sensor_temperature, None);
        assert!(status.heater);
        assert_eq!(status.firmware_version.as_deref(), Some("1.0.7"));
        assert_eq!(status.electrolysis, 12);
        assert_eq!(status.wet_film, Some(2));
        assert_eq!(status.current_humidity(), Some(43.0));
    }

    #[test]
    fn remote_readings_need_online_sensor() {
        let report = data(json!({ "gooseOnline": 0, "h": 4000, "t": 2000, "h0": 3000 }));
        let status = DeviceStatus::from_command_data(&report).unwrap();
        assert_eq!(status.remote_sensor_humidity, None);
        assert_eq!(status.remote_sensor_temperature, None);
        assert_eq!(status.current_humidity(), Some(30.0));
    }

    #[test]
    fn water_level_out_of_band_is_unknown() {
        let status = DeviceStatus::from_command_data(&data(json!({ "water": 121 }))).unwrap();
        assert_eq!(status.water_level, None);
    }

    #[test]
    fn changes_leave_other_fields_alone() {
        let status = DeviceStatus {
            fan_speed: 30,
            ..DeviceStatus::default()
        };
        let next = status.with_changes(&StatusChanges::default().power(true));

        assert!(next.power);
        assert_eq!(next.fan_speed, 30);
        assert!(!status.power);
    }

    #[test]
    fn command_data_keeps_wire_order() {
        let keys: Vec<String> = DeviceStatus::default()
            .to_command_data()
            .keys()
            .cloned()
            .collect();
        assert_eq!(keys, ["power", "mode", "cadr", "lock", "uv", "anion"]);
    }
}
