use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Not found: {entity} with {field}={value}")]
    NotFound {
        entity: &'static str,
        field: &'static str,
        value: String,
    },

    /// The store could not be reached; the same call may succeed later
    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid transition for {entity} {id}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id: i32,
        from: String,
        to: String,
    },

    #[error("Already exists: {0}")]
    Conflict(String),

    #[error("Storage: {0}")]
    Storage(String),
}

impl DomainError {
    /// Whether this error is likely transient (e.g. DB connection lost)
    /// and the operation may succeed if retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, DomainError::Unavailable(_))
    }
}

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Metrics exporter error: {0}")]
    Metrics(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Infra(#[from] InfraError),
}

impl From<sea_orm::DbErr> for AppError {
    fn from(e: sea_orm::DbErr) -> Self {
        AppError::Infra(InfraError::Database(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_store_is_transient() {
        assert!(DomainError::Unavailable("connection reset".into()).is_transient());
        assert!(!DomainError::Storage("no such column".into()).is_transient());
        assert!(!DomainError::Conflict("Reservation 1".into()).is_transient());
        assert!(!DomainError::NotFound {
            entity: "Reservation",
            field: "id",
            value: "1".into(),
        }
        .is_transient());
    }

    #[test]
    fn invalid_transition_message() {
        let e = DomainError::InvalidTransition {
            entity: "Reservation",
            id: 7,
            from: "Completed".into(),
            to: "Canceled".into(),
        };
        assert_eq!(
            e.to_string(),
            "Invalid transition for Reservation 7: Completed -> Canceled"
        );
    }
}
