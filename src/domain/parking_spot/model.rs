//! Parking spot domain entity

use crate::domain::gate::GateTopics;

/// A reservable parking spot and the gate controller in front of it
#[derive(Debug, Clone, PartialEq)]
pub struct ParkingSpot {
    pub id: i32,
    pub name: String,
    /// Device id of the gate controller. `None` for the legacy single gate
    /// listening on the shared topics.
    pub gate_device_id: Option<String>,
}

impl ParkingSpot {
    pub fn new(id: i32, name: impl Into<String>, gate_device_id: Option<String>) -> Self {
        Self {
            id,
            name: name.into(),
            gate_device_id,
        }
    }

    /// Command/status topics of this spot's gate under `prefix`.
    pub fn gate_topics(&self, prefix: &str) -> GateTopics {
        match self.gate_device_id.as_deref() {
            Some(device) => GateTopics::for_device(prefix, device),
            None => GateTopics::shared(prefix),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spot_without_device_uses_shared_topics() {
        let spot = ParkingSpot::new(1, "A-01", None);
        let topics = spot.gate_topics("parking/gate");
        assert_eq!(topics.command, "parking/gate/open");
        assert_eq!(topics.status, "parking/gate/status");
    }

    #[test]
    fn spot_with_device_uses_device_topics() {
        let spot = ParkingSpot::new(2, "B-07", Some("esp-07".into()));
        let topics = spot.gate_topics("parking/gate");
        assert_eq!(topics.command, "parking/gate/esp-07/open");
        assert_eq!(topics.status, "parking/gate/esp-07/status");
    }
}
