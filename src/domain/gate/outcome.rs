//! Gate status reports and their classification

use serde::Deserialize;

use super::command::CorrelationKey;

/// Result of one gate command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Device reports the gate was actuated
    Opened,
    /// Device refused: no vehicle in front of the gate
    NoCarDetected,
    /// Device reported anything else
    HardwareError(String),
    /// No correlated report before the deadline
    Timeout,
    /// Broker connection down; nothing was published
    TransportUnavailable,
    /// Another command for the same gate is still in flight
    Busy,
}

impl GateOutcome {
    /// Classify a device status text.
    ///
    /// Case-insensitive substring match: "gate opened" wins over "no car",
    /// everything else is a hardware error carrying the raw text.
    pub fn classify(text: &str) -> Self {
        let lower = text.to_lowercase();
        if lower.contains("gate opened") {
            Self::Opened
        } else if lower.contains("no car") {
            Self::NoCarDetected
        } else {
            Self::HardwareError(text.trim().to_string())
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::NoCarDetected => "no_car_detected",
            Self::HardwareError(_) => "hardware_error",
            Self::Timeout => "timeout",
            Self::TransportUnavailable => "transport_unavailable",
            Self::Busy => "busy",
        }
    }
}

impl std::fmt::Display for GateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HardwareError(detail) => write!(f, "hardware_error: {}", detail),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Deserialize)]
struct StatusEnvelope {
    #[serde(alias = "message", alias = "state")]
    status: Option<String>,
    #[serde(alias = "correlationId", alias = "cid")]
    correlation_id: Option<String>,
}

/// A decoded status message from a gate controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// Key echoed by correlation-aware firmware
    pub correlation_key: Option<CorrelationKey>,
    pub text: String,
}

impl StatusReport {
    /// Decode a status payload.
    ///
    /// Accepts a JSON object (`status`/`message` plus optional
    /// `correlation_id`), a JSON string, or free text.
    pub fn parse(payload: &[u8]) -> Self {
        if let Ok(envelope) = serde_json::from_slice::<StatusEnvelope>(payload) {
            return Self {
                correlation_key: envelope
                    .correlation_id
                    .filter(|id| !id.is_empty())
                    .map(CorrelationKey::from),
                text: envelope
                    .status
                    .unwrap_or_else(|| String::from_utf8_lossy(payload).into_owned()),
            };
        }

        if let Ok(text) = serde_json::from_slice::<String>(payload) {
            return Self {
                correlation_key: None,
                text,
            };
        }

        Self {
            correlation_key: None,
            text: String::from_utf8_lossy(payload).trim().to_string(),
        }
    }

    pub fn outcome(&self) -> GateOutcome {
        GateOutcome::classify(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_reference_messages() {
        assert_eq!(GateOutcome::classify("Gate opened"), GateOutcome::Opened);
        assert_eq!(GateOutcome::classify("GATE OPENED ok"), GateOutcome::Opened);
        assert_eq!(GateOutcome::classify("No car detected"), GateOutcome::NoCarDetected);
        assert_eq!(GateOutcome::classify("no CAR"), GateOutcome::NoCarDetected);
        assert_eq!(
            GateOutcome::classify(" servo stalled "),
            GateOutcome::HardwareError("servo stalled".to_string())
        );
    }

    #[test]
    fn free_text_payload() {
        let report = StatusReport::parse(b"Gate opened\n");
        assert_eq!(report.correlation_key, None);
        assert_eq!(report.outcome(), GateOutcome::Opened);
    }

    #[test]
    fn json_payload_with_correlation() {
        let report = StatusReport::parse(br#"{"status":"No car detected","correlation_id":"k1"}"#);
        assert_eq!(report.correlation_key, Some(CorrelationKey::from("k1")));
        assert_eq!(report.outcome(), GateOutcome::NoCarDetected);
    }

    #[test]
    fn json_payload_with_message_alias() {
        let report = StatusReport::parse(br#"{"message":"Gate opened"}"#);
        assert_eq!(report.correlation_key, None);
        assert_eq!(report.outcome(), GateOutcome::Opened);
    }

    #[test]
    fn json_string_payload() {
        let report = StatusReport::parse(br#""No car""#);
        assert_eq!(report.outcome(), GateOutcome::NoCarDetected);
    }

    #[test]
    fn empty_correlation_id_is_ignored() {
        let report = StatusReport::parse(br#"{"status":"Gate opened","correlation_id":""}"#);
        assert_eq!(report.correlation_key, None);
    }

    #[test]
    fn json_without_status_falls_back_to_raw_text() {
        let report = StatusReport::parse(br#"{"error":"E42"}"#);
        assert!(matches!(report.outcome(), GateOutcome::HardwareError(t) if t.contains("E42")));
    }
}
