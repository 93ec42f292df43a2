use chrono::{DateTime, Utc};
use std::fmt;

const PREVIEW_LEN: usize = 48;

/// One publish received from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl fmt::Display for MqttMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = String::from_utf8_lossy(&self.payload);
        let preview: String = text.chars().take(PREVIEW_LEN).collect();
        let ellipsis = if text.chars().count() > PREVIEW_LEN {
            "..."
        } else {
            ""
        };
        write!(
            f,
            "{} {} - {}{}",
            self.received_at.format("%H:%M:%S"),
            self.topic,
            preview,
            ellipsis
        )
    }
}

impl MqttMessage {
    pub fn from_topic(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        MqttMessage {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_is_truncated() {
        let message = MqttMessage::from_topic("airwater/01/0/1/1/7", vec![b'x'; 100]);
        let rendered = message.to_string();
        assert!(rendered.contains("airwater/01/0/1/1/7"));
        assert!(rendered.ends_with("..."));
        assert_eq!(rendered.matches('x').count(), PREVIEW_LEN);
    }

    #[test]
    fn short_payload_is_shown_whole() {
        let message = MqttMessage::from_topic("t", b"{}".to_vec());
        assert!(message.to_string().ends_with("t - {}"));
    }
}
