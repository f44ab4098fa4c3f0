pub mod gate;
pub mod ports;
pub mod services;

// Re-export key types for convenience
pub use gate::{
    spawn_inbound_dispatcher, CorrelationRegistry, GateExchange, GateProtocol, GateProtocolConfig,
    SharedGateProtocol,
};
pub use ports::{GateTransport, InboundMessage, OutboundMessage, TransportError};
pub use services::{GateError, ReservationGatekeeper, SharedGatekeeper};
