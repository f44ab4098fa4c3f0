//! Gate topic naming

/// Command and status topic pair for one gate controller
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GateTopics {
    pub command: String,
    pub status: String,
}

impl GateTopics {
    /// Topics shared by every controller without a device id:
    /// `{prefix}/open` and `{prefix}/status`.
    pub fn shared(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self {
            command: format!("{}/open", prefix),
            status: format!("{}/status", prefix),
        }
    }

    /// Per-device topics: `{prefix}/{device}/open` and `{prefix}/{device}/status`.
    pub fn for_device(prefix: &str, device_id: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        Self {
            command: format!("{}/{}/open", prefix, device_id),
            status: format!("{}/{}/status", prefix, device_id),
        }
    }
}
