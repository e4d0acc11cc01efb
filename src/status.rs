//! Read-only eligibility report.
//!
//! `logsync status` shows what the next `sync` would do without touching
//! the remote store beyond listing its partitions: the horizon, how many
//! partitions are checkpointed, and which ones are still eligible.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::ingest;

pub async fn run_status(config: &Config, now: DateTime<Utc>) -> Result<()> {
    let (syncer, client, pool) = ingest::connect(config).await?;
    let plan = syncer.plan(now).await?;
    let records = CheckpointStore::new(pool.clone())
        .records(&config.remote.index_prefix)
        .await?;

    let total_documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await?;
    pool.close().await;

    println!("logsync status");
    println!("==============");
    println!();
    println!("  Remote:        {}", client.base_url());
    println!("  Database:      {}", config.db.path.display());
    println!("  Now:           {}", now.format("%Y-%m-%dT%H:%M:%SZ"));
    println!("  Horizon:       {}", plan.horizon.last());
    println!();
    println!("  Catalog:       {}", plan.catalog.len());
    println!("  Checkpointed:  {}", records.len());
    println!("  Eligible:      {}", plan.eligible.len());
    println!("  Documents:     {}", total_documents);

    if let Some(last) = records.last() {
        println!(
            "  Last checkpoint: {} at {}",
            last.partition,
            last.completed_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    if !plan.eligible.is_empty() {
        println!();
        println!("  Pending partitions:");
        for partition in &plan.eligible {
            println!("    {}", partition);
        }
    }

    Ok(())
}
