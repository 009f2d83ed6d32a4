//! Database connection and initialization.

use std::path::Path;

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;

const MIGRATION_SQL: &str = include_str!("../../migrations/001_init.sql");

/// Database connection wrapper.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Initialize the SQLite database.
///
/// Creates the database file if it doesn't exist, runs migrations,
/// and returns a connection pool.
pub async fn init_database(db_path: &str, max_connections: u32) -> Result<Database> {
    if db_path == ":memory:" {
        return init_memory_database().await;
    }

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path);
    info!("Connecting to database: {}", db_path);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(&db_url)
        .await
        .with_context(|| format!("opening {}", db_path))?;

    run_migrations(&pool).await?;
    Ok(Database { pool })
}

/// Private in-memory database. A single connection that never expires, so
/// the data lives as long as the pool.
pub async fn init_memory_database() -> Result<Database> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    run_migrations(&pool).await?;
    Ok(Database { pool })
}

/// Run database migrations.
///
/// The script holds trigger bodies with embedded semicolons, so it is sent
/// whole rather than split into statements.
async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");
    sqlx::raw_sql(MIGRATION_SQL)
        .execute(pool)
        .await
        .context("migration 001_init failed")?;
    info!("Database migrations complete");
    Ok(())
}
