//! Schema creation. Idempotent: every statement is `IF NOT EXISTS`.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the passages table and its indexes on an open pool.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // content_hash is the sole uniqueness key; inserts never overwrite.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS passages (
            content_hash TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_passages_source ON passages(source)")
        .execute(pool)
        .await?;

    Ok(())
}
