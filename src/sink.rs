//! Idempotent page writer for the `documents` table.
//!
//! A page of N documents becomes one templated conditional insert repeated N
//! times, each copy with its own indexed placeholders:
//!
//! ```sql
//! INSERT OR IGNORE INTO documents (document_id, index_name, ...)
//!     SELECT ?1, ?2, ... WHERE NOT EXISTS
//!         (SELECT 1 FROM documents WHERE document_id = ?1 AND index_name = ?2)
//! UNION ALL
//!     SELECT ?16, ?17, ... WHERE NOT EXISTS (...)
//! ```
//!
//! The whole page runs in one `BEGIN IMMEDIATE` transaction. That takes the
//! database write lock before any existence check runs, so concurrent runs
//! cannot both pass the guard for the same `(document_id, index_name)`. A
//! plain deferred transaction would only lock at the first write. The
//! transaction is a `sqlx::Transaction`, so a write that never reaches
//! commit (error or cancelled future) is rolled back when it is dropped.
//!
//! SQLite caps a compound SELECT at 500 terms, so large pages are split into
//! several statements inside the same transaction.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::Result;
use crate::models::Document;
use crate::partition::PartitionId;

/// Bound parameters per document.
const WIDTH: usize = 15;

const COLUMNS: [&str; WIDTH] = [
    "document_id",
    "index_name",
    "event_category",
    "event_timestamp",
    "event_type",
    "host",
    "syslog_hostname",
    "source_zone",
    "application",
    "reason",
    "category",
    "url",
    "attack_name",
    "threat_severity",
    "inserted_at",
];

/// Documents per statement; keeps the compound SELECT under SQLite's limit.
pub const ROWS_PER_STATEMENT: usize = 250;

#[derive(Clone)]
pub struct WriteSink {
    pool: SqlitePool,
}

impl WriteSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert every document of `page` that is not stored yet for `partition`.
    ///
    /// Returns the number of rows actually inserted; documents already
    /// present are skipped silently.
    pub async fn apply(&self, page: &[Document], partition: &PartitionId) -> Result<u64> {
        if page.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let written = write_chunks(&mut *tx, page, partition).await?;
        tx.commit().await?;

        debug!(
            partition = %partition,
            page = page.len(),
            written,
            "page committed"
        );
        Ok(written)
    }
}

async fn write_chunks(
    conn: &mut SqliteConnection,
    page: &[Document],
    partition: &PartitionId,
) -> Result<u64> {
    let inserted_at = Utc::now().timestamp();
    let mut written = 0;

    for chunk in page.chunks(ROWS_PER_STATEMENT) {
        let sql = guarded_insert_sql(chunk.len());
        let mut query = sqlx::query(&sql);
        for doc in chunk {
            query = query
                .bind(&doc.document_id)
                .bind(partition.as_str())
                .bind(&doc.event_category)
                .bind(doc.event_timestamp.timestamp())
                .bind(&doc.event_type)
                .bind(&doc.host)
                .bind(&doc.syslog_hostname)
                .bind(&doc.source_zone)
                .bind(&doc.application)
                .bind(&doc.reason)
                .bind(&doc.category)
                .bind(&doc.url)
                .bind(&doc.attack_name)
                .bind(&doc.threat_severity)
                .bind(inserted_at);
        }
        written += query.execute(&mut *conn).await?.rows_affected();
    }

    Ok(written)
}

/// Build the conditional insert for `rows` documents.
///
/// Row `r` (0-based) binds placeholders `?{r*WIDTH+1}` to `?{r*WIDTH+WIDTH}`
/// in [`COLUMNS`] order; the guard reuses its first two.
pub fn guarded_insert_sql(rows: usize) -> String {
    let columns = COLUMNS.join(", ");
    let selects: Vec<String> = (0..rows)
        .map(|r| {
            let base = r * WIDTH;
            let values = (1..=WIDTH)
                .map(|i| format!("?{}", base + i))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "SELECT {} WHERE NOT EXISTS (SELECT 1 FROM documents WHERE document_id = ?{} AND index_name = ?{})",
                values,
                base + 1,
                base + 2
            )
        })
        .collect();

    format!(
        "INSERT OR IGNORE INTO documents ({}) {}",
        columns,
        selects.join(" UNION ALL ")
    )
}
