use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::MqttConfig;
use super::message_manager::MqttMessage;
use super::{Transport, TransportError, TransportEvent};

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
    Reconnecting,
}

impl ConnectionState {
    /// First connect attempt has an outcome
    fn is_settled(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Failed)
    }
}

struct PollSession {
    client: AsyncClient,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// `rumqttc` transport for one device.
///
/// A fresh client/event loop pair is created on every `connect`; the event loop
/// is polled in its own task which reconnects after `reconnect_delay` and
/// re-subscribes the topic set on every ConnAck.
pub struct MqttHandler {
    options: MqttOptions,
    config: MqttConfig,
    broker: String,
    events: mpsc::Sender<TransportEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    topics: Arc<std::sync::Mutex<Vec<String>>>,
    session: Mutex<Option<PollSession>>,
}

impl MqttHandler {
    pub fn new(
        client_id: &str,
        host: &str,
        port: u16,
        config: &MqttConfig,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(config.keep_alive());

        let (events, events_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let handler = MqttHandler {
            options,
            config: config.clone(),
            broker: format!("{}:{}", host, port),
            events,
            state: Arc::new(state),
            topics: Arc::new(std::sync::Mutex::new(Vec::new())),
            session: Mutex::new(None),
        };

        (handler, events_rx)
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.options.set_credentials(username, password);
        self
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        match self.topics.lock() {
            Ok(topics) => topics.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Transport for MqttHandler {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut state_rx = self.state.subscribe();
        {
            let mut session = self.session.lock().await;
            if session.is_some() {
                debug!("MQTT session to {} already running", self.broker);
                return Ok(());
            }

            info!("Connecting to MQTT broker {}", self.broker);
            self.state.send_replace(ConnectionState::Connecting);

            let (client, eventloop) =
                AsyncClient::new(self.options.clone(), self.config.channel_capacity.max(1));
            let cancel = CancellationToken::new();

            let poll_loop = PollLoop {
                client: client.clone(),
                eventloop,
                topics: Arc::clone(&self.topics),
                events: self.events.clone(),
                state: Arc::clone(&self.state),
                reconnect_delay: self.config.reconnect_delay(),
                cancel: cancel.clone(),
            };
            let task = tokio::spawn(poll_loop.run());

            *session = Some(PollSession {
                client,
                cancel,
                task,
            });
        }

        let outcome = tokio::time::timeout(
            self.config.connect_timeout(),
            state_rx.wait_for(ConnectionState::is_settled),
        )
        .await
        .map(|result| result.map(|state| *state));

        match outcome {
            Ok(Ok(ConnectionState::Connected)) => Ok(()),
            Ok(Ok(_)) => Err(TransportError::Connect(format!(
                "{} unreachable, retrying in background",
                self.broker
            ))),
            Ok(Err(_)) => Err(TransportError::Connect("connection state closed".into())),
            Err(_) => Err(TransportError::Connect(format!(
                "no answer from {} within {:?}",
                self.broker,
                self.config.connect_timeout()
            ))),
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(session) = self.session.lock().await.take() else {
            return Ok(());
        };

        let was_connected = self.is_connected();
        let result = session
            .client
            .disconnect()
            .await
            .map_err(|err| TransportError::Disconnect(err.to_string()));

        session.cancel.cancel();
        if let Err(err) = session.task.await {
            error!("MQTT poll task ended abnormally: {}", err);
        }

        self.state.send_replace(ConnectionState::Disconnected);
        if was_connected {
            let _ = self.events.try_send(TransportEvent::Disconnected {
                reason: "disconnect requested".into(),
            });
        }
        info!("Disconnected from MQTT broker {}", self.broker);

        result
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let session = self.session.lock().await;
        let client = match session.as_ref() {
            Some(session) if self.is_connected() => &session.client,
            _ => return Err(TransportError::NotConnected),
        };

        debug!(
            "Transmitting on {}: {}",
            topic,
            String::from_utf8_lossy(&payload)
        );
        client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|err| TransportError::Publish {
                topic: topic.to_string(),
                reason: err.to_string(),
            })
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        {
            let mut topics = match self.topics.lock() {
                Ok(topics) => topics,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !topics.iter().any(|known| known == topic) {
                topics.push(topic.to_string());
            }
        }

        let session = self.session.lock().await;
        match session.as_ref() {
            Some(session) if self.is_connected() => {
                info!("Subscribe to {}", topic);
                session
                    .client
                    .subscribe(topic, QoS::AtMostOnce)
                    .await
                    .map_err(|err| TransportError::Subscribe {
                        topic: topic.to_string(),
                        reason: err.to_string(),
                    })
            }
            _ => {
                debug!("Subscription to {} deferred until connected", topic);
                Ok(())
            }
        }
    }

    fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }
}

struct PollLoop {
    client: AsyncClient,
    eventloop: EventLoop,
    topics: Arc<std::sync::Mutex<Vec<String>>>,
    events: mpsc::Sender<TransportEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
    reconnect_delay: Duration,
    cancel: CancellationToken,
}

impl PollLoop {
    async fn run(mut self) {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => self.on_connected().await,
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = MqttMessage::from_topic(publish.topic, publish.payload.to_vec());
                    debug!("Received {}", message);
                    self.emit(TransportEvent::Message(message)).await;
                }
                Ok(_) => {}
                Err(err) => {
                    self.on_connection_lost(err.to_string()).await;

                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                    self.state.send_replace(ConnectionState::Reconnecting);
                }
            }
        }

        debug!("MQTT poll loop stopped");
    }

    async fn on_connected(&mut self) {
        info!("Connected to MQTT broker");
        self.state.send_replace(ConnectionState::Connected);

        let topics = match self.topics.lock() {
            Ok(topics) => topics.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for topic in topics {
            info!("Subscribe to {}", topic);
            // try_subscribe: this task drains the request queue, so it must not wait on it
            if let Err(err) = self.client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                error!("Re-subscribe to {} failed: {}", topic, err);
            }
        }

        self.emit(TransportEvent::Connected).await;
    }

    async fn on_connection_lost(&mut self, reason: String) {
        let previous = self.state.send_replace(ConnectionState::Failed);
        if previous == ConnectionState::Connected {
            warn!("Disconnected from MQTT broker: {}", reason);
            self.emit(TransportEvent::Disconnected { reason }).await;
        } else {
            error!("Failed to connect to MQTT broker: {}", reason);
        }
    }

    async fn emit(&mut self, event: TransportEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Transport event dropped, no receiver");
        }
    }
}
