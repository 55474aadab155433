pub mod models;
pub mod queries;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::debug;

pub const AUDIT_LEDGER_SCHEMA: &str = include_str!("../../migrations/001_audit_ledger.sql");

/// Handle to the ledger's relational store
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        debug!("Connected to {}", database_url);
        Ok(Database { pool })
    }

    /// Open an existing ledger for inspection only. A missing file is an
    /// error rather than a freshly created empty ledger.
    pub async fn open_read_only(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(false)
            .read_only(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        debug!("Opened {} read-only", database_url);
        Ok(Database { pool })
    }

    /// In-memory database for tests and dry runs. Each SQLite memory
    /// connection is its own database, so the pool is pinned to one.
    pub async fn new_in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let database = Database { pool };
        database.run_migrations().await?;
        Ok(database)
    }

    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(AUDIT_LEDGER_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
