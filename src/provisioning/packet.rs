//! Credential payload framing
//!
//! The payload `len(ssid) ssid len(password) password` is cut into 16-byte
//! chunks. Frame `i` of `N` is `[i, ((i + 1) << 4) + N, 0x00, 0x15] + chunk`.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::ProvisioningError;

pub const PACKET_SIZE: usize = 16;

/// Checksum byte overflows past this many frames
pub const MAX_FRAMES: usize = 15;

const FRAME_TAG: [u8; 2] = [0x00, 0x15];

/// Notification the device sends once it accepted the credentials
pub const ACK_NOTIFICATION: [u8; 5] = [0x00, 0x11, 0x00, 0x15, 0x01];

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }

    /// Length-prefixed payload; lengths are UTF-8 byte counts.
    pub fn to_payload(&self) -> Result<Vec<u8>, ProvisioningError> {
        let mut payload = Vec::with_capacity(self.ssid.len() + self.password.len() + 2);
        for (field, value) in [("ssid", &self.ssid), ("password", &self.password)] {
            let len = u8::try_from(value.len()).map_err(|_| {
                ProvisioningError::PayloadTooLarge(format!(
                    "{} is {} bytes, at most 255 fit",
                    field,
                    value.len()
                ))
            })?;
            payload.push(len);
            payload.extend_from_slice(value.as_bytes());
        }
        Ok(payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningFrame {
    pub seq: u8,
    pub checksum: u8,
    pub chunk: Vec<u8>,
}

impl ProvisioningFrame {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.chunk.len());
        bytes.push(self.seq);
        bytes.push(self.checksum);
        bytes.extend_from_slice(&FRAME_TAG);
        bytes.extend_from_slice(&self.chunk);
        bytes
    }
}

pub fn checksum(seq: u8, frame_count: u8) -> u8 {
    ((seq + 1) << 4) + frame_count
}

pub fn build_frames(payload: &[u8]) -> Result<Vec<ProvisioningFrame>, ProvisioningError> {
    let frame_count = payload.len().div_ceil(PACKET_SIZE);
    if frame_count > MAX_FRAMES {
        return Err(ProvisioningError::PayloadTooLarge(format!(
            "{} bytes need {} frames, at most {} fit",
            payload.len(),
            frame_count,
            MAX_FRAMES
        )));
    }

    // frame_count <= MAX_FRAMES, so every index fits a u8
    let total = frame_count as u8;
    Ok(payload
        .chunks(PACKET_SIZE)
        .enumerate()
        .map(|(index, chunk)| {
            let seq = index as u8;
            ProvisioningFrame {
                seq,
                checksum: checksum(seq, total),
                chunk: chunk.to_vec(),
            }
        })
        .collect())
}

/// What is written after the device acknowledged the credentials.
///
/// Deployed firmware accepts a replay of the last streamed frame; the
/// `[N, 0x11, 0x00, 0x16]` acknowledgement frame is the documented alternative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosingFrame {
    #[default]
    ReplayLastFrame,
    Acknowledgement,
}

impl ClosingFrame {
    pub fn bytes(self, frames: &[ProvisioningFrame]) -> Vec<u8> {
        match self {
            ClosingFrame::ReplayLastFrame => frames
                .last()
                .map(ProvisioningFrame::to_bytes)
                .unwrap_or_default(),
            ClosingFrame::Acknowledgement => {
                let next_seq = frames.last().map_or(0, |frame| frame.seq.wrapping_add(1));
                vec![next_seq, 0x11, 0x00, 0x16]
            }
        }
    }
}
