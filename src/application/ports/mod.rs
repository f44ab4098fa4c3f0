//! Application ports (hexagonal architecture boundaries)
//!
//! Repository contracts live in `domain`. Outbound ports towards devices
//! live here.

pub mod outbound;

pub use outbound::{
    GateTransport, InboundMessage, InboundStream, OutboundMessage, QoS, TransportError,
};
