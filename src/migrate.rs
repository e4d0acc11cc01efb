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

/// Create the checkpoint and document tables if they do not exist yet.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Checkpoint table: one row per fully ingested partition
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS log_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            index_name TEXT NOT NULL,
            inserted_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS uidx_index_name ON log_entries (index_name)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id TEXT NOT NULL,
            index_name TEXT NOT NULL,
            event_category TEXT NOT NULL,
            event_timestamp INTEGER NOT NULL,
            event_type TEXT NOT NULL,
            host TEXT,
            syslog_hostname TEXT,
            source_zone TEXT,
            application TEXT,
            reason TEXT,
            category TEXT,
            url TEXT,
            attack_name TEXT,
            threat_severity TEXT,
            inserted_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Backstop for the insert guard in sink.rs
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS uidx_document_id_index_name ON documents (document_id, index_name)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_event_timestamp ON documents (event_timestamp DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
