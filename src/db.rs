//! SQLite database connection management.
//!
//! The pool runs in WAL mode and is sized to `sync.concurrency + 1`: every
//! partition task can hold its own connection for a page write while one
//! connection stays free for catalog and checkpoint traffic. Partition tasks
//! must never share a single connection, because each page write holds an
//! immediate (write-locking) transaction.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::Config;

/// Create a connection pool to the configured SQLite database.
///
/// Creates the database file and parent directories if they don't exist.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(config.db.busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(pool_size(config.sync.concurrency))
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// One connection per concurrent partition task plus one shared.
pub fn pool_size(concurrency: usize) -> u32 {
    u32::try_from(concurrency).unwrap_or(u32::MAX - 1) + 1
}
