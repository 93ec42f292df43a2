//! Provisioning handshake as a typed state machine
//!
//! ```text
//! Idle ─connect─> Connected ─prepare─> Streaming ─stream─> AwaitingAck ─┬─> Acknowledged ─close─> Closed
//!                                                                        ├─> TimedOut  ─close─> Err(Timeout)
//!                                                                        └─> Cancelled ─close─> Err(Cancelled)
//! ```
//!
//! Every failing step releases the BLE link before returning its error.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use statum::{machine, state};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::packet::{
    build_frames, ClosingFrame, Credentials, ProvisioningFrame, ACK_NOTIFICATION,
};
use super::{
    ProvisioningError, ShortRangeTransport, COMMAND_CHARACTERISTIC, NOTIFICATION_CHARACTERISTIC,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeOptions {
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub closing_frame: ClosingFrame,
}

impl Default for HandshakeOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(300),
            max_attempts: 60,
            closing_frame: ClosingFrame::default(),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum HandshakeState {
    Idle,
    Connected,
    Streaming,
    AwaitingAck,
    Acknowledged,
    TimedOut,
    Cancelled,
    Closed,
}

#[machine]
pub struct ProvisioningSession<S: HandshakeState> {
    transport: Box<dyn ShortRangeTransport>,
    options: HandshakeOptions,
    cancel: CancellationToken,
    frames: Vec<ProvisioningFrame>,
    notifications: Option<mpsc::Receiver<Vec<u8>>>,
    frames_sent: usize,
    attempts: u32,
}

/// Result of waiting for the device acknowledgement
pub enum AckOutcome {
    Acknowledged(ProvisioningSession<Acknowledged>),
    TimedOut(ProvisioningSession<TimedOut>),
    Cancelled(ProvisioningSession<Cancelled>),
}

impl<S: HandshakeState> ProvisioningSession<S> {
    pub fn frames_sent(&self) -> usize {
        self.frames_sent
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Runs `step` unless the session gets cancelled first.
    async fn guarded<T>(
        &self,
        step: impl Future<Output = Result<T, ProvisioningError>>,
    ) -> Result<T, ProvisioningError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ProvisioningError::Cancelled),
            result = step => result,
        }
    }

    /// Stops notifications and disconnects; errors are logged, never returned.
    async fn release(&mut self) {
        if self.notifications.take().is_some() {
            if let Err(err) = self
                .transport
                .unsubscribe_notifications(NOTIFICATION_CHARACTERISTIC)
                .await
            {
                debug!("Stopping notifications failed: {}", err);
            }
        }

        if let Err(err) = self.transport.disconnect().await {
            warn!("BLE disconnect failed: {}", err);
        }
    }

    async fn fail(mut self, err: ProvisioningError) -> ProvisioningError {
        error!("Provisioning failed: {}", err);
        self.release().await;
        err
    }
}

impl ProvisioningSession<Idle> {
    pub fn create(
        transport: Box<dyn ShortRangeTransport>,
        options: HandshakeOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self::new(transport, options, cancel, Vec::new(), None, 0, 0)
    }

    pub async fn connect(self) -> Result<ProvisioningSession<Connected>, ProvisioningError> {
        info!("Connecting to device over BLE");
        match self.guarded(self.transport.connect()).await {
            Ok(()) => Ok(self.transition()),
            Err(err) => Err(self.fail(err).await),
        }
    }
}

impl ProvisioningSession<Connected> {
    /// Builds the frames and starts listening for the acknowledgement.
    pub async fn prepare(
        mut self,
        credentials: &Credentials,
    ) -> Result<ProvisioningSession<Streaming>, ProvisioningError> {
        let frames = match credentials.to_payload().and_then(|payload| build_frames(&payload)) {
            Ok(frames) => frames,
            Err(err) => return Err(self.fail(err).await),
        };

        let subscription = self.guarded(
            self.transport
                .subscribe_notifications(NOTIFICATION_CHARACTERISTIC),
        );
        match subscription.await {
            Ok(notifications) => {
                debug!("Credentials split into {} frames", frames.len());
                self.frames = frames;
                self.notifications = Some(notifications);
                Ok(self.transition())
            }
            Err(err) => Err(self.fail(err).await),
        }
    }
}

impl ProvisioningSession<Streaming> {
    /// Writes all frames in order, each with delivery confirmation.
    pub async fn stream(mut self) -> Result<ProvisioningSession<AwaitingAck>, ProvisioningError> {
        for index in 0..self.frames.len() {
            let bytes = self.frames[index].to_bytes();
            debug!("> {}", hex::encode(&bytes));

            let write = self.transport.write(COMMAND_CHARACTERISTIC, &bytes, true);
            if let Err(err) = self.guarded(write).await {
                return Err(self.fail(err).await);
            }
            self.frames_sent += 1;
        }

        Ok(self.transition())
    }
}

impl ProvisioningSession<AwaitingAck> {
    /// Polls for the acknowledgement every `poll_interval`, up to `max_attempts` times.
    ///
    /// Notifications other than the acknowledgement are logged and ignored.
    pub async fn wait_for_ack(mut self) -> AckOutcome {
        while self.attempts < self.options.max_attempts {
            let cancelled = tokio::select! {
                _ = self.cancel.cancelled() => true,
                _ = tokio::time::sleep(self.options.poll_interval) => false,
            };
            if cancelled {
                return AckOutcome::Cancelled(self.transition());
            }
            self.attempts += 1;

            if self.drain_notifications() {
                info!("Device acknowledged credentials after {} polls", self.attempts);
                return AckOutcome::Acknowledged(self.transition());
            }
        }

        AckOutcome::TimedOut(self.transition())
    }

    fn drain_notifications(&mut self) -> bool {
        let Some(notifications) = self.notifications.as_mut() else {
            return false;
        };

        let mut acknowledged = false;
        loop {
            match notifications.try_recv() {
                Ok(data) => {
                    debug!("< {}", hex::encode(&data));
                    if data == ACK_NOTIFICATION {
                        acknowledged = true;
                    } else {
                        error!("Unexpected data: {}", hex::encode(&data));
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        acknowledged
    }
}

impl ProvisioningSession<Acknowledged> {
    /// Sends the closing frame and releases the link.
    pub async fn close(mut self) -> Result<ProvisioningSession<Closed>, ProvisioningError> {
        let closing = self.options.closing_frame.bytes(&self.frames);
        debug!("> {}", hex::encode(&closing));

        let write = self.transport.write(COMMAND_CHARACTERISTIC, &closing, true);
        if let Err(err) = self.guarded(write).await {
            return Err(self.fail(err).await);
        }

        self.release().await;
        info!("Provisioning finished");
        Ok(self.transition())
    }
}

impl ProvisioningSession<TimedOut> {
    pub async fn close(mut self) -> ProvisioningError {
        let attempts = self.attempts;
        warn!("No acknowledgement after {} polls", attempts);
        self.release().await;
        ProvisioningError::Timeout { attempts }
    }
}

impl ProvisioningSession<Cancelled> {
    pub async fn close(mut self) -> ProvisioningError {
        info!("Provisioning cancelled");
        self.release().await;
        ProvisioningError::Cancelled
    }
}

impl ProvisioningSession<Closed> {}
