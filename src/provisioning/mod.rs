//! # BLE Provisioning
//!
//! Hands Wi-Fi credentials to a factory-fresh AirWater device over BLE.
//!
//! ```text
//! provisioning/
//! ├── packet.rs     - Credential payload and checksummed 16-byte frames
//! ├── handshake.rs  - Typed handshake state machine (statum)
//! └── ble.rs        - btleplug discovery and link
//! ```
//!
//! The handshake only needs a [`ShortRangeTransport`]; `ble.rs` provides the
//! btleplug implementation, tests use an in-memory link.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub mod ble;
pub mod handshake;
pub mod packet;

pub use handshake::{AckOutcome, HandshakeOptions, ProvisioningSession};
pub use packet::{ClosingFrame, Credentials};

/// Characteristic the credential frames are written to
pub const COMMAND_CHARACTERISTIC: Uuid = Uuid::from_u128(0x22210001_554a_4546_5542_46534450464d);

/// Characteristic the device acknowledges on
pub const NOTIFICATION_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x22210002_554a_4546_5542_46534450464d);

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("AP binding timeout after {attempts} polls")]
    Timeout { attempts: u32 },

    #[error("Provisioning cancelled")]
    Cancelled,

    #[error("Credentials too large: {0}")]
    PayloadTooLarge(String),

    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Connection-oriented short-range link (BLE GATT) to one device
#[async_trait]
pub trait ShortRangeTransport: Send + Sync {
    async fn connect(&self) -> Result<(), ProvisioningError>;

    async fn write(
        &self,
        characteristic: Uuid,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), ProvisioningError>;

    /// Starts notifications; values arrive on the returned channel in order.
    async fn subscribe_notifications(
        &self,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Vec<u8>>, ProvisioningError>;

    async fn unsubscribe_notifications(&self, characteristic: Uuid)
        -> Result<(), ProvisioningError>;

    async fn disconnect(&self) -> Result<(), ProvisioningError>;
}

/// Runs the whole handshake. The link is released on every exit path.
pub async fn provision(
    transport: Box<dyn ShortRangeTransport>,
    credentials: &Credentials,
    options: HandshakeOptions,
    cancel: CancellationToken,
) -> Result<(), ProvisioningError> {
    let session = ProvisioningSession::create(transport, options, cancel)
        .connect()
        .await?
        .prepare(credentials)
        .await?
        .stream()
        .await?;

    match session.wait_for_ack().await {
        AckOutcome::Acknowledged(session) => session.close().await.map(|_| ()),
        AckOutcome::TimedOut(session) => Err(session.close().await),
        AckOutcome::Cancelled(session) => Err(session.close().await),
    }
}
