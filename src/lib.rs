//! # Raknah Gate Service
//!
//! Opens parking gates for reservations over MQTT.
//!
//! ## Architecture
//!
//! The project follows Clean Architecture principles:
//!
//! - **domain**: reservations, parking spots, gate commands and outcomes
//! - **application**: correlation registry, gate protocol, gatekeeper
//! - **infrastructure**: MQTT and loopback transports, SeaORM and in-memory storage
//! - **server**: runtime wiring and graceful shutdown

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod server;
pub mod shared;

pub use config::{default_config_path, AppConfig};

pub use application::{GateError, ReservationGatekeeper};
pub use domain::{GateOutcome, GateTopics, Reservation};
pub use infrastructure::{init_database, DatabaseConfig, SeaOrmRepositoryProvider};
pub use server::{init_tracing, ServerHandle, ServerOptions, TransportMode};
