//! # MQTT Transport
//!
//! Publish/subscribe plumbing between a device session and the broker the
//! humidifiers talk to. The session only sees the [`Transport`] trait and an
//! ordered stream of [`TransportEvent`]s; [`mqtt_handler::MqttHandler`] is the
//! `rumqttc` implementation.
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker connection tuning
//! ├── message_manager.rs  - Inbound message representation
//! └── mqtt_handler.rs     - rumqttc event loop, reconnects and resubscription
//! ```
//!
//! Events are delivered over an mpsc channel created together with the
//! transport, so there is exactly one consumer and messages keep their arrival
//! order.

use async_trait::async_trait;
use thiserror::Error;

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;

pub use config::MqttConfig;
pub use message_manager::MqttMessage;
pub use mqtt_handler::{ConnectionState, MqttHandler};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("Disconnect failed: {0}")]
    Disconnect(String),
}

/// What the transport reports to its single consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: String },
    Message(MqttMessage),
}

/// Publish/subscribe client used by a device session.
///
/// Implementations serialize connect, disconnect and publish internally and
/// keep retrying a lost connection on their own.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Adds a topic to the subscription set. The set is re-subscribed on every reconnect.
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}
