//! Device state engine
//!
//! Owns the current [`DeviceStatus`] and [`DeviceSettings`] snapshots of one
//! device and reconciles inbound envelopes into new snapshots. Pure state: the
//! caller passes `now` in and is responsible for I/O, persistence and
//! serializing access (one inbound message at a time).

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::settings::{DeviceSettings, SettingsChanges};
use super::status::{DeviceStatus, StatusChanges};
use crate::protocol::{CodecError, CommandData, CommandEnvelope, CommandId};

/// A device is unavailable once no message arrived for this long
pub const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the device is asked to push status reports (seconds)
pub const PUSH_FREQUENCY_SECS: i64 = 600;

/// How long each push burst lasts (seconds)
pub const PUSH_DURATION_SECS: i64 = 10;

/// Which snapshots an inbound envelope replaced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub status_changed: bool,
    pub settings_changed: bool,
}

#[derive(Debug, Clone)]
pub struct DeviceStateEngine {
    status: DeviceStatus,
    settings: DeviceSettings,
    last_update: Option<Instant>,
    last_envelopes: BTreeMap<CommandId, CommandEnvelope>,
}

impl DeviceStateEngine {
    pub fn new(settings: DeviceSettings) -> Self {
        Self {
            status: DeviceStatus::default(),
            settings,
            last_update: None,
            last_envelopes: BTreeMap::new(),
        }
    }

    pub fn status(&self) -> &DeviceStatus {
        &self.status
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }

    /// Last envelope received per command id, kept for diagnostics
    pub fn last_envelopes(&self) -> &BTreeMap<CommandId, CommandEnvelope> {
        &self.last_envelopes
    }

    /// Reconciles one inbound envelope.
    ///
    /// Every decodable envelope counts as a sign of life and is recorded, even if
    /// its payload turns out to be unusable.
    pub fn on_inbound_envelope(
        &mut self,
        envelope: CommandEnvelope,
        now: Instant,
    ) -> Result<Reconciliation, CodecError> {
        self.last_update = Some(now);
        self.last_envelopes.insert(envelope.command, envelope.clone());

        match envelope.command {
            CommandId::StatusInfo => {
                let status = DeviceStatus::from_command_data(&envelope.data)?;
                let status_changed = status != self.status;
                self.status = status;

                let cascaded =
                    SettingsChanges::default().target_humidity(self.status.target_humidity);
                let settings_changed =
                    self.replace_settings(self.settings.with_changes(&cascaded));

                Ok(Reconciliation {
                    status_changed,
                    settings_changed,
                })
            }
            CommandId::SetInfo => {
                let next = self.settings.update_from_command_data(&envelope.data);
                Ok(Reconciliation {
                    status_changed: false,
                    settings_changed: self.replace_settings(next),
                })
            }
            other => {
                warn!("Unhandled command {} recorded for diagnostics", other);
                Ok(Reconciliation::default())
            }
        }
    }

    /// Applies a local-only settings change. Returns whether the snapshot changed.
    pub fn update_settings(&mut self, changes: &SettingsChanges) -> bool {
        self.replace_settings(self.settings.with_changes(changes))
    }

    fn replace_settings(&mut self, next: DeviceSettings) -> bool {
        if next == self.settings {
            return false;
        }

        debug!("Settings changed: {:?}", next);
        self.settings = next;
        true
    }

    /// CONTROL envelope carrying the full control state after `changes`.
    ///
    /// The local status is not touched; the next STATUS_INFO report is authoritative.
    pub fn control_command(&self, changes: &StatusChanges, now_unix: i64) -> CommandEnvelope {
        let desired = self.status.with_changes(changes);
        CommandEnvelope::new(CommandId::Control, now_unix, desired.to_command_data())
    }

    /// SET envelope carrying the full settings state after `changes`.
    pub fn set_command(&self, changes: &SettingsChanges, now_unix: i64) -> CommandEnvelope {
        let desired = self.settings.with_changes(changes);
        CommandEnvelope::new(CommandId::Set, now_unix, desired.to_command_data())
    }

    /// GET_STATUS envelope announcing the polling parameters
    pub fn keep_alive_command(&self, now_unix: i64) -> CommandEnvelope {
        let water_type = self.settings.water_type;

        let mut data = CommandData::new();
        data.insert("cleanTime".into(), json!(water_type.cleaning_time()));
        data.insert("water_type".into(), json!(water_type.code()));
        data.insert("frequencyTime".into(), json!(PUSH_FREQUENCY_SECS));
        data.insert("durationTime".into(), json!(PUSH_DURATION_SECS));

        CommandEnvelope::new(CommandId::GetStatus, now_unix, data)
    }

    /// Connected, heard from, and heard from recently.
    pub fn is_available(&self, connected: bool, now: Instant) -> bool {
        match self.last_update {
            Some(last_update) if connected => {
                now.saturating_duration_since(last_update) < AVAILABILITY_TIMEOUT
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::settings::WaterType;
    use crate::device::status::OperatingMode;
    use serde_json::Value;

    fn envelope(command: CommandId, data: Value) -> CommandEnvelope {
        CommandEnvelope::new(command, 1_700_000_000, data.as_object().cloned().unwrap())
    }

    #[test]
    fn status_cascades_target_humidity_into_settings() {
        let mut engine = DeviceStateEngine::new(DeviceSettings::default());
        let now = Instant::now();

        let outcome = engine
            .on_inbound_envelope(envelope(CommandId::StatusInfo, json!({ "hThreshold": 55 })), now)
            .unwrap();

        assert!(outcome.settings_changed);
        assert_eq!(engine.settings().target_humidity, 55);
        assert_eq!(engine.status().target_humidity, 55);
    }

    #[test]
    fn same_target_humidity_leaves_settings_untouched() {
        let mut engine = DeviceStateEngine::new(DeviceSettings::default());
        let before = engine.settings().clone();

        let outcome = engine
            .on_inbound_envelope(
                envelope(CommandId::StatusInfo, json!({ "hThreshold": 45, "power": 1 })),
                Instant::now(),
            )
            .unwrap();

        assert!(outcome.status_changed);
        assert!(!outcome.settings_changed);
        assert_eq!(engine.settings(), &before);
    }

    #[test]
    fn set_info_updates_settings() {
        let mut engine = DeviceStateEngine::new(DeviceSettings::default());
        let outcome = engine
            .on_inbound_envelope(
                envelope(CommandId::SetInfo, json!({ "pirLock": 0 })),
                Instant::now(),
            )
            .unwrap();

        assert!(outcome.settings_changed);
        assert!(!engine.settings().proximity_sensor);
    }

    #[test]
    fn other_commands_are_only_recorded() {
        let mut engine = DeviceStateEngine::new(DeviceSettings::default());
        let outcome = engine
            .on_inbound_envelope(
                envelope(CommandId::SterilizationInfo, json!({ "state": 1 })),
                Instant::now(),
            )
            .unwrap();

        assert_eq!(outcome, Reconciliation::default());
        assert!(engine
            .last_envelopes()
            .contains_key(&CommandId::SterilizationInfo));
    }

    #[test]
    fn bad_status_still_counts_as_sign_of_life() {
        let mut engine = DeviceStateEngine::new(DeviceSettings::default());
        let now = Instant::now();

        let result =
            engine.on_inbound_envelope(envelope(CommandId::StatusInfo, json!({ "mode": 42 })), now);

        assert!(result.is_err());
        assert_eq!(engine.last_update(), Some(now));
        assert_eq!(engine.status(), &DeviceStatus::default());
    }

    #[test]
    fn availability_window() {
        let mut engine = DeviceStateEngine::new(DeviceSettings::default());
        let start = Instant::now();

        assert!(!engine.is_available(true, start));

        engine
            .on_inbound_envelope(envelope(CommandId::StatusInfo, json!({})), start)
            .unwrap();

        assert!(engine.is_available(true, start));
        assert!(!engine.is_available(false, start));
        assert!(engine.is_available(true, start + Duration::from_secs(29)));
        assert!(!engine.is_available(true, start + AVAILABILITY_TIMEOUT));
    }

    #[test]
    fn control_command_pushes_full_state() {
        let mut engine = DeviceStateEngine::new(DeviceSettings::default());
        engine
            .on_inbound_envelope(
                envelope(
                    CommandId::StatusInfo,
                    json!({ "power": 1, "mode": 1, "cadr": 30, "lock": 1, "uv": 1, "anion": 1 }),
                ),
                Instant::now(),
            )
            .unwrap();

        let command = engine.control_command(
            &StatusChanges::default()
                .fan_speed(70)
                .mode(OperatingMode::Manual),
            1_700_000_100,
        );

        assert_eq!(command.command, CommandId::Control);
        assert_eq!(command.time, 1_700_000_100);
        assert_eq!(
            Value::Object(command.data),
            json!({ "power": 1, "mode": 0, "cadr": 70, "lock": 1, "uv": 1, "anion": 1 })
        );
        assert_eq!(engine.status().fan_speed, 30);
    }

    #[test]
    fn set_command_pushes_full_settings() {
        let engine = DeviceStateEngine::new(DeviceSettings::default());
        let command = engine.set_command(&SettingsChanges::default().heater(false), 1);

        assert_eq!(command.command, CommandId::Set);
        assert_eq!(command.data["powerHeat"], json!(0));
        assert_eq!(command.data["hThreshold"], json!(45));
        assert_eq!(command.data.len(), 7);
        assert!(engine.settings().heater);
    }

    #[test]
    fn keep_alive_announces_water_type_and_polling() {
        let mut engine = DeviceStateEngine::new(DeviceSettings::default());
        assert!(engine.update_settings(&SettingsChanges::default().water_type(WaterType::Filtered)));
        assert!(!engine.update_settings(&SettingsChanges::default().water_type(WaterType::Filtered)));

        let command = engine.keep_alive_command(5);
        assert_eq!(command.command, CommandId::GetStatus);
        assert_eq!(
            Value::Object(command.data),
            json!({ "cleanTime": 300, "water_type": 1, "frequencyTime": 600, "durationTime": 10 })
        );
    }
}
