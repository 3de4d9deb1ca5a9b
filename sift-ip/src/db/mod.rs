//! Database access for sift-ip
//!
//! SQLite database in the service root folder, holding the result cache
//! entries and the settings table.

pub mod settings;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Use proper SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Initialize sift-ip specific tables
///
/// Creates cache_entries and settings tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    // Create settings table for configuration persistence
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create cache_entries table: one row per (image, signature) sub-result
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_entries (
            image_url TEXT NOT NULL,
            signature TEXT NOT NULL,
            value_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (image_url, signature)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (settings, cache_entries)");

    Ok(())
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    // One connection: each in-memory SQLite connection is its own database
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_tables(&pool).await.unwrap();
    pool
}
