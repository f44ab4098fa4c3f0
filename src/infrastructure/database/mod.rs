pub mod entities;
pub mod migrator;
pub mod repositories;

pub use repositories::SeaOrmRepositoryProvider;

use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use tracing::info;

use crate::config::DatabaseSection;
use migrator::Migrator;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://./raknah.db?mode=rwc")
    pub url: String,
    pub max_connections: Option<u32>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./raknah.db?mode=rwc".to_string(),
            max_connections: None,
        }
    }
}

impl DatabaseConfig {
    /// Create config for SQLite
    pub fn sqlite(path: &str) -> Self {
        Self {
            url: format!("sqlite://{}?mode=rwc", path),
            max_connections: None,
        }
    }

    /// Private in-memory SQLite database. One connection, since every
    /// connection would otherwise see its own empty database.
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: Some(1),
        }
    }
}

impl From<&DatabaseSection> for DatabaseConfig {
    fn from(section: &DatabaseSection) -> Self {
        Self {
            url: section.url.clone(),
            max_connections: section.max_connections,
        }
    }
}

/// Initialize database connection
pub async fn init_database(config: &DatabaseConfig) -> Result<DatabaseConnection, sea_orm::DbErr> {
    info!("Connecting to database: {}", config.url);

    let mut options = ConnectOptions::new(config.url.clone());
    options
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);
    if let Some(max) = config.max_connections {
        options.max_connections(max);
    }

    let db = Database::connect(options).await?;
    info!("Database connected successfully");
    Ok(db)
}

/// Apply pending migrations
pub async fn run_migrations(db: &DatabaseConnection) -> Result<(), sea_orm::DbErr> {
    Migrator::up(db, None).await?;
    info!("Database migrations applied");
    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_database() -> DatabaseConnection {
    let db = init_database(&DatabaseConfig::in_memory()).await.unwrap();
    run_migrations(&db).await.unwrap();
    db
}
