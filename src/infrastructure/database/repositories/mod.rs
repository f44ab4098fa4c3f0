//! Database repository implementations
//!
//! Per-aggregate SeaORM repositories + unified RepositoryProvider.

pub mod parking_spot_repository;
pub mod repository_provider;
pub mod reservation_repository;

pub use repository_provider::SeaOrmRepositoryProvider;

use sea_orm::{DbErr, SqlErr};

use crate::domain::DomainError;

/// Map a SeaORM error onto the domain taxonomy. Only connection-level
/// failures and SQLite lock contention are reported as transient.
fn db_err(e: DbErr) -> DomainError {
    if let Some(SqlErr::UniqueConstraintViolation(detail)) = e.sql_err() {
        return DomainError::Conflict(detail);
    }
    match &e {
        DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => {
            DomainError::Unavailable(format!("Database unavailable: {}", e))
        }
        DbErr::Exec(_) | DbErr::Query(_) if e.to_string().contains("database is locked") => {
            DomainError::Unavailable(format!("Database busy: {}", e))
        }
        _ => DomainError::Storage(format!("Database error: {}", e)),
    }
}
