use thiserror::Error;

/// Errors raised while encoding or decoding command envelopes
#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload is not JSON, not an object, or lacks a usable `cmdId`
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// `cmdId` is an integer the firmware protocol does not define
    #[error("Unknown command id: {0}")]
    UnknownCommandId(u64),

    /// A payload field carries a value that cannot be mapped
    #[error("Invalid value for field '{field}': {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
