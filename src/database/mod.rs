//! SQLite data-store handle shared with task executors.
//!
//! The scheduler treats this as an opaque handle; only task bodies issue
//! queries through it. Write-conflict handling is left to SQLite.

use anyhow::Result;
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Pool, Sqlite};
use tracing::{debug, info};

use crate::config::DatabaseConfig;

#[derive(Clone, Debug)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub fn pool(&self) -> Pool<Sqlite> {
        self.pool.clone()
    }

    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let in_memory = config.url.contains(":memory:");

        // Create database if it doesn't exist
        if !in_memory && !Sqlite::database_exists(&config.url).await? {
            info!("Creating database at {}", config.url);
            Sqlite::create_database(&config.url).await?;
        }

        // Every connection to an in-memory URL is a separate database.
        let max_connections = if in_memory {
            1
        } else {
            config.max_connections.unwrap_or(5)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&config.url)
            .await?;

        debug!(
            "Database pool ready ({} max connections)",
            max_connections
        );

        Ok(Self { pool })
    }

    /// Round-trip a trivial query
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
