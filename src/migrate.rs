//! Store schema.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the store tables if they do not exist. Idempotent.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // The full dictionary lives in `body` as JSON; the other columns exist
    // for listing without deserializing it.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dictionaries (
            id TEXT PRIMARY KEY,
            connection_id TEXT NOT NULL,
            database_name TEXT NOT NULL,
            dialect TEXT NOT NULL,
            generated_at TEXT NOT NULL,
            total_tables INTEGER NOT NULL,
            total_columns INTEGER NOT NULL,
            partial INTEGER NOT NULL DEFAULT 0,
            fingerprint TEXT NOT NULL,
            body TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_dictionaries_connection \
         ON dictionaries(connection_id, generated_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
