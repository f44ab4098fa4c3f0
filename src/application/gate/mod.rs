//! Gate command exchange: correlation, protocol, inbound routing

pub mod dispatcher;
pub mod protocol;
pub mod registry;

pub use dispatcher::spawn_inbound_dispatcher;
pub use protocol::{GateExchange, GateProtocol, GateProtocolConfig, SharedGateProtocol};
pub use registry::{CorrelationRegistry, Delivery, RegistryError, Waiter};
