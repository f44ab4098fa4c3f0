//! Gate transports
//!
//! Implementations of [`GateTransport`](crate::application::ports::GateTransport).

pub mod loopback;
pub mod mqtt;

pub use loopback::{DeviceReply, DeviceResponder, LoopbackTransport, SimulatedGate};
pub use mqtt::MqttTransport;
