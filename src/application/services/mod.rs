//! Application services

mod gatekeeper;

pub use gatekeeper::{GateError, ReservationGatekeeper, SharedGatekeeper};
