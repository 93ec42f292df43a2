//! # Device Session
//!
//! One running AirWater device: identity, state engine, transport, settings
//! store and keep-alive scheduler, driven by a single actor task.
//!
//! ## Event flow
//!
//! ```text
//! Transport ──events──> session task ──decode──> engine ──> watch<DeviceSnapshot>
//!                            │                      │
//!                     keep-alive tick        settings changed ──> SettingsStore
//!
//! intent API ──> engine (full snapshot) ──encode+sign──> Transport::publish
//! ```
//!
//! Inbound messages are reconciled one at a time in arrival order. The intent
//! API shares the engine through a mutex and publishes directly; it never
//! touches the local snapshots, the next status report does.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::engine::DeviceStateEngine;
use super::error::DeviceError;
use super::keep_alive::{KeepAliveScheduler, KeepAliveTrigger, KEEP_ALIVE_INTERVAL};
use super::model::DeviceIdentity;
use super::settings::{DeviceSettings, SettingsChanges, WaterType};
use super::status::{DeviceStatus, OperatingMode, StatusChanges};
use crate::mqtt::{MqttConfig, MqttHandler, MqttMessage, Transport, TransportEvent};
use crate::persistence::SettingsStore;
use crate::protocol::{self, CommandData, CommandEnvelope, CommandId};

/// Delay before a changed settings snapshot is written
pub const SETTINGS_SAVE_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub keep_alive_interval: Duration,
    pub save_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            keep_alive_interval: KEEP_ALIVE_INTERVAL,
            save_delay: SETTINGS_SAVE_DELAY,
        }
    }
}

/// What listeners see after every reconciliation or keep-alive
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub status: DeviceStatus,
    pub settings: DeviceSettings,
    pub available: bool,
}

#[derive(Debug, Clone)]
pub struct Diagnostics {
    pub identity: DeviceIdentity,
    pub connected: bool,
    pub available: bool,
    pub since_last_update: Option<Duration>,
    pub status: DeviceStatus,
    pub settings: DeviceSettings,
    pub last_envelopes: BTreeMap<CommandId, CommandEnvelope>,
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

struct Shared {
    identity: DeviceIdentity,
    engine: Mutex<DeviceStateEngine>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn SettingsStore>,
    snapshot: watch::Sender<DeviceSnapshot>,
    options: SessionOptions,
}

impl Shared {
    async fn notify(&self) {
        let snapshot = {
            let engine = self.engine.lock().await;
            DeviceSnapshot {
                status: engine.status().clone(),
                settings: engine.settings().clone(),
                available: engine.is_available(self.transport.is_connected(), Instant::now()),
            }
        };
        self.snapshot.send_replace(snapshot);
    }

    async fn publish(&self, envelope: &CommandEnvelope) -> Result<(), DeviceError> {
        let payload = protocol::encode(envelope, &self.identity.sign_key)?;
        self.transport
            .publish(&protocol::command_topic(self.identity.id), payload)
            .await?;
        Ok(())
    }

    /// Notifies listeners and, when connected, re-requests status pushes.
    async fn refresh(&self, trigger: KeepAliveTrigger) -> Result<(), DeviceError> {
        self.notify().await;

        if !self.transport.is_connected() {
            debug!(
                "{}: skipping keep-alive ({:?}), not connected",
                self.identity.name(),
                trigger
            );
            return Ok(());
        }

        let envelope = self.engine.lock().await.keep_alive_command(now_unix());
        debug!("{}: keep-alive ({:?})", self.identity.name(), trigger);
        self.publish(&envelope).await
    }

    async fn handle_message(&self, message: MqttMessage) {
        let expected = protocol::status_topic(self.identity.id);
        if message.topic != expected {
            debug!("{}: ignoring message on {}", self.identity.name(), message.topic);
            return;
        }

        let envelope = match protocol::decode(&message.payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("{}: dropping message: {}", self.identity.name(), err);
                return;
            }
        };
        debug!("{}: received {}", self.identity.name(), envelope.command);
        if !protocol::verify_signature(&envelope, &self.identity.sign_key) {
            // Devices are trusted through the broker; reports are applied regardless
            debug!(
                "{}: {} carries an unexpected signature",
                self.identity.name(),
                envelope.command
            );
        }

        let (outcome, settings) = {
            let mut engine = self.engine.lock().await;
            let outcome = engine.on_inbound_envelope(envelope, Instant::now());
            (outcome, engine.settings().clone())
        };

        match outcome {
            Ok(reconciliation) if reconciliation.settings_changed => {
                self.store.schedule_save(settings, self.options.save_delay);
            }
            Ok(_) => {}
            Err(err) => warn!("{}: report rejected: {}", self.identity.name(), err),
        }

        self.notify().await;
    }

    async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<TransportEvent>,
        cancel: CancellationToken,
    ) {
        let mut scheduler = KeepAliveScheduler::new(self.options.keep_alive_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(TransportEvent::Connected) => {
                        info!("{}: connected", self.identity.name());
                        scheduler.reset();
                        if let Err(err) = self.refresh(KeepAliveTrigger::Connected).await {
                            warn!("{}: keep-alive failed: {}", self.identity.name(), err);
                        }
                    }
                    Some(TransportEvent::Disconnected { reason }) => {
                        warn!("{}: disconnected: {}", self.identity.name(), reason);
                        self.notify().await;
                    }
                    Some(TransportEvent::Message(message)) => self.handle_message(message).await,
                    None => {
                        warn!("{}: transport event channel closed", self.identity.name());
                        break;
                    }
                },
                trigger = scheduler.tick() => {
                    if let Err(err) = self.refresh(trigger).await {
                        warn!("{}: keep-alive failed: {}", self.identity.name(), err);
                    }
                }
            }
        }

        debug!("{}: session task stopped", self.identity.name());
    }
}

/// A running device session.
pub struct AirWaterDevice {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AirWaterDevice {
    /// Loads settings, connects the transport and starts the session task.
    ///
    /// `events` must be the receiver created together with `transport`.
    /// Connect failures are logged; the transport keeps retrying and the first
    /// `Connected` event triggers a keep-alive.
    pub async fn start(
        identity: DeviceIdentity,
        transport: Arc<dyn Transport>,
        events: mpsc::Receiver<TransportEvent>,
        store: Arc<dyn SettingsStore>,
        options: SessionOptions,
    ) -> Self {
        let settings = match store.load().await {
            Ok(Some(settings)) => settings,
            Ok(None) => DeviceSettings::default(),
            Err(err) => {
                warn!(
                    "{}: stored settings unusable, using defaults: {}",
                    identity.name(),
                    err
                );
                DeviceSettings::default()
            }
        };

        let engine = DeviceStateEngine::new(settings);
        let (snapshot, _) = watch::channel(DeviceSnapshot {
            status: engine.status().clone(),
            settings: engine.settings().clone(),
            available: false,
        });

        let shared = Arc::new(Shared {
            identity,
            engine: Mutex::new(engine),
            transport,
            store,
            snapshot,
            options,
        });

        let name = shared.identity.name();
        info!("{}: starting session", name);

        let topic = protocol::status_topic(shared.identity.id);
        if let Err(err) = shared.transport.subscribe(&topic).await {
            error!("{}: {}", name, err);
        }
        if let Err(err) = shared.transport.connect().await {
            error!("{}: {}", name, err);
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&shared).run(events, cancel.clone()));
        shared.notify().await;

        Self {
            shared,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Starts a session talking to the device's broker through `rumqttc`.
    pub async fn connect_mqtt(
        identity: DeviceIdentity,
        mqtt: &MqttConfig,
        store: Arc<dyn SettingsStore>,
        options: SessionOptions,
    ) -> Self {
        let (handler, events) = MqttHandler::new(
            &format!("airwater-{}", identity.id),
            &identity.endpoint.host,
            identity.endpoint.port,
            mqtt,
        );
        let handler =
            handler.with_credentials(format!("aw_{}", identity.id), identity.sign_key.clone());

        Self::start(identity, Arc::new(handler), events, store, options).await
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.shared.identity
    }

    pub fn name(&self) -> String {
        self.shared.identity.name()
    }

    pub fn status(&self) -> DeviceStatus {
        self.shared.snapshot.borrow().status.clone()
    }

    pub fn settings(&self) -> DeviceSettings {
        self.shared.snapshot.borrow().settings.clone()
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    /// Change notifications; fires after every message, keep-alive and disconnect.
    pub fn subscribe(&self) -> watch::Receiver<DeviceSnapshot> {
        self.shared.snapshot.subscribe()
    }

    pub async fn is_available(&self) -> bool {
        self.shared
            .engine
            .lock()
            .await
            .is_available(self.shared.transport.is_connected(), Instant::now())
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        let connected = self.shared.transport.is_connected();
        let now = Instant::now();
        let engine = self.shared.engine.lock().await;

        Diagnostics {
            identity: self.shared.identity.clone(),
            connected,
            available: engine.is_available(connected, now),
            since_last_update: engine
                .last_update()
                .map(|last_update| now.saturating_duration_since(last_update)),
            status: engine.status().clone(),
            settings: engine.settings().clone(),
            last_envelopes: engine.last_envelopes().clone(),
        }
    }

    pub async fn turn_on(&self) -> Result<(), DeviceError> {
        self.control(StatusChanges::default().power(true)).await
    }

    pub async fn turn_off(&self) -> Result<(), DeviceError> {
        self.control(StatusChanges::default().power(false)).await
    }

    pub async fn set_mode(&self, mode: OperatingMode) -> Result<(), DeviceError> {
        self.control(StatusChanges::default().mode(mode)).await
    }

    /// Manual fan speed; switches the device to manual mode.
    pub async fn set_fan_speed(&self, speed: u32) -> Result<(), DeviceError> {
        self.control(
            StatusChanges::default()
                .fan_speed(speed)
                .mode(OperatingMode::Manual),
        )
        .await
    }

    pub async fn set_child_lock(&self, on: bool) -> Result<(), DeviceError> {
        self.control(StatusChanges::default().child_lock(on)).await
    }

    pub async fn set_anion(&self, on: bool) -> Result<(), DeviceError> {
        self.control(StatusChanges::default().anion(on)).await
    }

    pub async fn set_target_humidity(&self, humidity: u32) -> Result<(), DeviceError> {
        self.set(SettingsChanges::default().target_humidity(humidity))
            .await
    }

    pub async fn set_heater(&self, on: bool) -> Result<(), DeviceError> {
        self.set(SettingsChanges::default().heater(on)).await
    }

    pub async fn set_proximity_sensor(&self, on: bool) -> Result<(), DeviceError> {
        self.set(SettingsChanges::default().proximity_sensor(on))
            .await
    }

    pub async fn set_auto_shake(&self, on: bool) -> Result<(), DeviceError> {
        self.set(SettingsChanges::default().auto_shake(on)).await
    }

    /// Water type is never sent with SET; it is stored locally and announced
    /// through the keep-alive.
    pub async fn set_water_type(&self, water_type: WaterType) -> Result<(), DeviceError> {
        let changed = {
            let mut engine = self.shared.engine.lock().await;
            engine
                .update_settings(&SettingsChanges::default().water_type(water_type))
                .then(|| engine.settings().clone())
        };

        if let Some(settings) = changed {
            self.shared
                .store
                .schedule_save(settings, self.shared.options.save_delay);
        }

        self.shared.refresh(KeepAliveTrigger::Requested).await
    }

    /// Re-evaluates availability and re-requests status pushes.
    pub async fn refresh(&self) -> Result<(), DeviceError> {
        self.shared.refresh(KeepAliveTrigger::Requested).await
    }

    /// Signs and publishes an arbitrary payload.
    pub async fn send_command(
        &self,
        command: CommandId,
        data: CommandData,
    ) -> Result<(), DeviceError> {
        let envelope = CommandEnvelope::new(command, now_unix(), data);
        self.shared.publish(&envelope).await
    }

    /// Like [`send_command`](Self::send_command) with a numeric command id and a JSON object text.
    pub async fn send_raw_command(&self, command_id: u64, payload: &str) -> Result<(), DeviceError> {
        let command = CommandId::try_from(command_id)?;
        let data = match serde_json::from_str::<Value>(payload) {
            Ok(Value::Object(data)) => data,
            Ok(other) => {
                return Err(DeviceError::InvalidPayload(format!(
                    "expected a JSON object, got {}",
                    other
                )))
            }
            Err(err) => return Err(DeviceError::InvalidPayload(err.to_string())),
        };

        self.send_command(command, data).await
    }

    async fn control(&self, changes: StatusChanges) -> Result<(), DeviceError> {
        let envelope = self
            .shared
            .engine
            .lock()
            .await
            .control_command(&changes, now_unix());
        self.shared.publish(&envelope).await
    }

    async fn set(&self, changes: SettingsChanges) -> Result<(), DeviceError> {
        let envelope = self
            .shared
            .engine
            .lock()
            .await
            .set_command(&changes, now_unix());
        self.shared.publish(&envelope).await
    }

    /// Stops the session task, disconnects and writes pending settings.
    pub async fn stop(&self) -> Result<(), DeviceError> {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(err) = task.await {
                error!("{}: session task ended abnormally: {}", self.name(), err);
            }
        }

        if let Err(err) = self.shared.transport.disconnect().await {
            warn!("{}: {}", self.name(), err);
        }
        self.shared.notify().await;
        self.shared.store.flush().await?;

        info!("{}: session stopped", self.name());
        Ok(())
    }

    /// Deletes the persisted settings. Pending saves are discarded.
    pub async fn remove_settings(&self) -> Result<(), DeviceError> {
        self.shared.store.remove().await?;
        info!("{}: settings removed", self.name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::model::{DeviceModel, Endpoint};
    use crate::mqtt::TransportError;
    use crate::persistence::MemorySettingsStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    const KEY: &str = "secret";

    struct MockTransport {
        connected: AtomicBool,
        refuse_connect: bool,
        events: mpsc::Sender<TransportEvent>,
        published: std::sync::Mutex<Vec<(String, Vec<u8>)>>,
        subscribed: std::sync::Mutex<Vec<String>>,
    }

    impl MockTransport {
        fn new(refuse_connect: bool) -> (Arc<Self>, mpsc::Receiver<TransportEvent>) {
            let (events, events_rx) = mpsc::channel(16);
            let transport = Arc::new(Self {
                connected: AtomicBool::new(false),
                refuse_connect,
                events,
                published: std::sync::Mutex::new(Vec::new()),
                subscribed: std::sync::Mutex::new(Vec::new()),
            });
            (transport, events_rx)
        }

        fn published(&self) -> Vec<CommandEnvelope> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .map(|(topic, payload)| {
                    assert_eq!(topic, "airwater/01/1/0/1/42");
                    protocol::decode(payload).unwrap()
                })
                .collect()
        }

        async fn deliver(&self, command: CommandId, data: Value) {
            let envelope = CommandEnvelope::new(command, 1, data.as_object().cloned().unwrap());
            let payload = protocol::encode(&envelope, KEY).unwrap();
            self.deliver_raw(payload).await;
        }

        async fn deliver_raw(&self, payload: Vec<u8>) {
            let message = MqttMessage::from_topic("airwater/01/0/1/1/42", payload);
            self.events
                .send(TransportEvent::Message(message))
                .await
                .unwrap();
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            if self.refuse_connect {
                return Err(TransportError::Connect("refused".into()));
            }
            self.connected.store(true, Ordering::SeqCst);
            let _ = self.events.send(TransportEvent::Connected).await;
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
            if !self.is_connected() {
                return Err(TransportError::NotConnected);
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload));
            Ok(())
        }

        async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
            self.subscribed.lock().unwrap().push(topic.to_string());
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            id: 42,
            model: DeviceModel::A3S,
            sign_key: KEY.into(),
            endpoint: Endpoint {
                host: "localhost".into(),
                port: 25883,
            },
        }
    }

    async fn start(
        refuse_connect: bool,
    ) -> (AirWaterDevice, Arc<MockTransport>, Arc<MemorySettingsStore>) {
        let (transport, events) = MockTransport::new(refuse_connect);
        let store = Arc::new(MemorySettingsStore::new());
        let device = AirWaterDevice::start(
            identity(),
            transport.clone(),
            events,
            store.clone(),
            SessionOptions::default(),
        )
        .await;
        settle().await;
        (device, transport, store)
    }

    /// Lets the session task drain its queue
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_on_connect_and_every_interval() {
        let (device, transport, _) = start(false).await;

        assert_eq!(
            *transport.subscribed.lock().unwrap(),
            vec!["airwater/01/0/1/1/42".to_string()]
        );
        let published = transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].command, CommandId::GetStatus);
        assert_eq!(
            Value::Object(published[0].data.clone()),
            json!({ "cleanTime": 150, "water_type": 2, "frequencyTime": 600, "durationTime": 10 })
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.published().len(), 2);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.published().len(), 3);

        device.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_requests_status_once() {
        let (device, transport, _) = start(false).await;
        assert_eq!(transport.published().len(), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        transport.connected.store(false, Ordering::SeqCst);
        transport
            .events
            .send(TransportEvent::Disconnected {
                reason: "broker restart".into(),
            })
            .await
            .unwrap();
        settle().await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        transport.connected.store(true, Ordering::SeqCst);
        transport.events.send(TransportEvent::Connected).await.unwrap();
        settle().await;

        let published = transport.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].command, CommandId::GetStatus);

        // The periodic tick restarts from the reconnect
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.published().len(), 2);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(transport.published().len(), 3);

        device.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn removing_settings_clears_the_store() {
        let (device, _, store) = start(false).await;

        device.set_water_type(WaterType::Filtered).await.unwrap();
        assert!(store.saved().is_some());

        device.remove_settings().await.unwrap();
        assert!(store.saved().is_none());

        device.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn status_report_updates_snapshot_and_saves_once() {
        let (device, transport, store) = start(false).await;
        let mut changes = device.subscribe();
        assert!(!device.is_available().await);

        let report = json!({ "power": 1, "mode": 1, "cadr": 30, "hThreshold": 60 });
        transport.deliver(CommandId::StatusInfo, report.clone()).await;
        settle().await;

        assert!(changes.has_changed().unwrap());
        let snapshot = changes.borrow_and_update().clone();
        assert!(snapshot.available);
        assert!(snapshot.status.power);
        assert_eq!(snapshot.settings.target_humidity, 60);
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.saved().unwrap().target_humidity, 60);

        transport.deliver(CommandId::StatusInfo, report).await;
        settle().await;
        assert_eq!(store.save_count(), 1);
        assert!(changes.has_changed().unwrap());

        device.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn availability_lapses_without_reports() {
        let (device, transport, _) = start(false).await;

        transport.deliver(CommandId::StatusInfo, json!({})).await;
        settle().await;
        assert!(device.is_available().await);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(device.is_available().await);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!device.is_available().await);

        device.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn control_commands_carry_full_signed_state() {
        let (device, transport, _) = start(false).await;
        transport
            .deliver(
                CommandId::StatusInfo,
                json!({ "power": 0, "mode": 1, "cadr": 30, "lock": 0, "uv": 1, "anion": 1 }),
            )
            .await;
        settle().await;

        device.set_fan_speed(70).await.unwrap();

        let sent = transport.published().pop().unwrap();
        assert_eq!(sent.command, CommandId::Control);
        assert_eq!(
            Value::Object(sent.data.clone()),
            json!({ "power": 0, "mode": 0, "cadr": 70, "lock": 0, "uv": 1, "anion": 1 })
        );
        assert!(protocol::verify_signature(&sent, KEY));
        assert_eq!(device.status().fan_speed, 30);

        device.set_heater(false).await.unwrap();
        let sent = transport.published().pop().unwrap();
        assert_eq!(sent.command, CommandId::Set);
        assert_eq!(sent.data["powerHeat"], json!(0));

        device.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_message_is_dropped() {
        let (device, transport, _) = start(false).await;

        transport.deliver_raw(b"not json".to_vec()).await;
        transport
            .deliver_raw(br#"{"cmdId":4242,"time":1,"data":{}}"#.to_vec())
            .await;
        settle().await;
        assert!(!device.is_available().await);

        transport.deliver(CommandId::StatusInfo, json!({ "power": 1 })).await;
        settle().await;
        assert!(device.is_available().await);
        assert!(device.status().power);

        device.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn water_type_is_saved_and_announced() {
        let (device, transport, store) = start(false).await;

        device.set_water_type(WaterType::Filtered).await.unwrap();

        assert_eq!(store.save_count(), 1);
        assert_eq!(device.settings().water_type, WaterType::Filtered);
        let sent = transport.published().pop().unwrap();
        assert_eq!(sent.command, CommandId::GetStatus);
        assert_eq!(sent.data["cleanTime"], json!(300));
        assert_eq!(sent.data["water_type"], json!(1));

        device.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn commands_fail_while_disconnected() {
        let (device, transport, _) = start(true).await;

        assert!(transport.published().is_empty());
        assert!(matches!(
            device.turn_on().await,
            Err(DeviceError::Transport(TransportError::NotConnected))
        ));

        device.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn raw_commands_are_validated() {
        let (device, transport, _) = start(false).await;

        device
            .send_raw_command(1002, r#"{"hThreshold":50}"#)
            .await
            .unwrap();
        let sent = transport.published().pop().unwrap();
        assert_eq!(sent.command, CommandId::Set);
        assert_eq!(sent.data["hThreshold"], json!(50));

        assert!(matches!(
            device.send_raw_command(7, "{}").await,
            Err(DeviceError::Codec(_))
        ));
        assert!(matches!(
            device.send_raw_command(1000, "[1, 2]").await,
            Err(DeviceError::InvalidPayload(_))
        ));

        device.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stored_settings_are_restored_and_stop_disconnects() {
        let (transport, events) = MockTransport::new(false);
        let store = Arc::new(MemorySettingsStore::with_settings(DeviceSettings {
            water_type: WaterType::Filtered,
            ..DeviceSettings::default()
        }));

        let device = AirWaterDevice::start(
            identity(),
            transport.clone(),
            events,
            store,
            SessionOptions::default(),
        )
        .await;
        settle().await;

        assert_eq!(device.settings().water_type, WaterType::Filtered);
        assert_eq!(transport.published()[0].data["water_type"], json!(1));

        device.stop().await.unwrap();
        assert!(!transport.is_connected());

        let diagnostics = device.diagnostics().await;
        assert!(!diagnostics.connected);
        assert!(diagnostics.last_envelopes.is_empty());
    }
}
