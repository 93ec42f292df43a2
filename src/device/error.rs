use thiserror::Error;

use crate::mqtt::TransportError;
use crate::persistence::StoreError;
use crate::protocol::CodecError;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Settings store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid command payload: {0}")]
    InvalidPayload(String),
}
