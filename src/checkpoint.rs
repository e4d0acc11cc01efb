//! Durable record of fully ingested partitions (`log_entries`).
//!
//! A row means "this partition was drained completely; never rescan it".
//! Rows are inserted once, after the last page of a partition has been
//! written, and are never updated or deleted.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::BTreeSet;

use crate::error::{is_unique_violation, Result};
use crate::models::CheckpointRecord;
use crate::partition::PartitionId;

/// Bound parameters per `IN (...)` query, well under SQLite's limit.
const IN_BATCH: usize = 500;

#[derive(Clone)]
pub struct CheckpointStore {
    pool: SqlitePool,
}

impl CheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The subset of `candidates` that already has a checkpoint.
    pub async fn completed(&self, candidates: &[PartitionId]) -> Result<BTreeSet<PartitionId>> {
        let mut done = BTreeSet::new();

        for batch in candidates.chunks(IN_BATCH) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT index_name FROM log_entries WHERE index_name IN (");
            let mut separated = qb.separated(", ");
            for partition in batch {
                separated.push_bind(partition.as_str().to_string());
            }
            separated.push_unseparated(")");

            let names: Vec<String> = qb
                .build_query_scalar::<String>()
                .fetch_all(&self.pool)
                .await?;
            let names: BTreeSet<String> = names.into_iter().collect();

            done.extend(
                batch
                    .iter()
                    .filter(|p| names.contains(p.as_str()))
                    .cloned(),
            );
        }

        Ok(done)
    }

    /// Record `partition` as complete.
    ///
    /// Returns `false` when a checkpoint already existed (an earlier or
    /// concurrent run got there first), which is not an error.
    pub async fn mark_complete(&self, partition: &PartitionId, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("INSERT INTO log_entries (index_name, inserted_at) VALUES (?, ?)")
            .bind(partition.as_str())
            .bind(at.timestamp())
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// All checkpoints for partitions named with `prefix`, oldest partition first.
    pub async fn records(&self, prefix: &str) -> Result<Vec<CheckpointRecord>> {
        let rows = sqlx::query("SELECT index_name, inserted_at FROM log_entries ORDER BY index_name")
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.get("index_name");
            let ts: i64 = row.get("inserted_at");
            let Ok(partition) = PartitionId::parse(prefix, &name) else {
                continue;
            };
            let completed_at = Utc
                .timestamp_opt(ts, 0)
                .single()
                .unwrap_or_default();
            records.push(CheckpointRecord {
                partition,
                completed_at,
            });
        }
        Ok(records)
    }
}
