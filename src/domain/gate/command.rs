//! Outbound gate command

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::topics::GateTopics;

/// Token pairing an outbound command with its status report
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Fresh random key (UUID v4, hyphenless)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CorrelationKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One "open" instruction for one gate. Lives only until resolved or timed out.
#[derive(Debug, Clone)]
pub struct GateCommand {
    pub key: CorrelationKey,
    pub topics: GateTopics,
    pub payload: Vec<u8>,
    pub issued_at: DateTime<Utc>,
    /// Broker-side expiry; the retained command is not replayed after this
    pub expires_in: Duration,
}

impl GateCommand {
    /// Build the open command: `{"message":"open","correlation_id":"<key>"}`.
    ///
    /// Firmware that predates correlation ignores the extra field.
    pub fn open(key: CorrelationKey, topics: GateTopics, expires_in: Duration) -> Self {
        let payload = serde_json::json!({
            "message": "open",
            "correlation_id": key.as_str(),
        })
        .to_string()
        .into_bytes();

        Self {
            key,
            topics,
            payload,
            issued_at: Utc::now(),
            expires_in,
        }
    }

    /// Expiry in whole seconds, as carried by the MQTT v5 property
    pub fn expiry_secs(&self) -> u32 {
        u32::try_from(self.expires_in.as_secs()).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_unique() {
        let a = CorrelationKey::generate();
        let b = CorrelationKey::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn open_payload_carries_message_and_key() {
        let key = CorrelationKey::from("abc123");
        let cmd = GateCommand::open(
            key.clone(),
            GateTopics::shared("parking/gate"),
            Duration::from_secs(180),
        );

        let json: serde_json::Value = serde_json::from_slice(&cmd.payload).unwrap();
        assert_eq!(json["message"], "open");
        assert_eq!(json["correlation_id"], "abc123");
        assert_eq!(cmd.topics.command, "parking/gate/open");
        assert_eq!(cmd.expiry_secs(), 180);
    }
}
