//! Gate controller vocabulary
//!
//! Topics, commands, status reports and outcomes exchanged with the gate
//! controller over the broker. Pure types; the request/response machinery
//! lives in `application::gate`.

pub mod command;
pub mod outcome;
pub mod topics;

pub use command::{CorrelationKey, GateCommand};
pub use outcome::{GateOutcome, StatusReport};
pub use topics::GateTopics;
