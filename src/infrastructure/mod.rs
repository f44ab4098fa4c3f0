//! Infrastructure layer - external concerns

pub mod database;
pub mod storage;
pub mod transport;

pub use database::{init_database, run_migrations, DatabaseConfig, SeaOrmRepositoryProvider};
pub use storage::InMemoryRepositoryProvider;
pub use transport::{LoopbackTransport, MqttTransport, SimulatedGate};
