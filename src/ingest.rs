//! Sync orchestration.
//!
//! Computes the eligible partition set and drains each eligible partition
//! through a scan-then-write pipeline:
//!
//! ```text
//! catalog ─▶ ≤ horizon ─▶ − checkpointed ─▶ eligible
//!                                              │  (bounded fan-out)
//!                       ┌──────────────────────┼──────────────────────┐
//!                       ▼                      ▼                      ▼
//!              cursor ▶ sink ▶ …      cursor ▶ sink ▶ …      cursor ▶ sink ▶ …
//!                       │                      │                      │
//!                  checkpoint             checkpoint             (failed: retried
//!                                                                 next run)
//! ```
//!
//! Each partition moves `Pending → Scanning → Succeeded | Failed`. Within a
//! partition, page N is written before page N+1 is requested. A failure
//! stops only its own partition, which stays un-checkpointed and is picked
//! up again by the next run; writes are idempotent, so re-scanning a
//! partially written partition is safe.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::checkpoint::CheckpointStore;
use crate::catalog::RemoteCatalog;
use crate::config::Config;
use crate::cursor::PartitionCursor;
use crate::db;
use crate::error::SyncError;
use crate::models::{Document, SearchHit};
use crate::partition::{Horizon, PartitionId};
use crate::remote::RemoteClient;
use crate::sink::WriteSink;
use crate::traits::{PartitionCatalog, SearchBackend};

/// Fixed clock used by `sync --test-run`, chosen to fall inside the
/// partitions created by `populate`.
pub const TEST_RUN_NOW: &str = "2023-01-02T09:00:00Z";

/// Knobs for a single run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub now: DateTime<Utc>,
    pub dry_run: bool,
    /// Process at most this many eligible partitions (oldest first).
    pub limit: Option<usize>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            now: Utc::now(),
            dry_run: false,
            limit: None,
        }
    }
}

/// The eligibility computation for one run.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub horizon: Horizon,
    pub catalog: Vec<PartitionId>,
    pub completed: BTreeSet<PartitionId>,
    pub eligible: Vec<PartitionId>,
}

/// Per-partition counters for a drained partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionStats {
    pub pages: usize,
    pub fetches: usize,
    pub documents_scraped: u64,
    pub documents_written: u64,
}

/// Terminal state of a partition's pipeline.
#[derive(Debug)]
pub enum PartitionOutcome {
    Succeeded(PartitionStats),
    Failed(SyncError),
}

/// Aggregate result of a run.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub horizon: Option<PartitionId>,
    pub catalog: usize,
    pub eligible: Vec<PartitionId>,
    pub completed: Vec<PartitionId>,
    pub failed: Vec<(PartitionId, String)>,
    pub documents_scraped: u64,
    pub documents_written: u64,
}

/// Settings the orchestrator needs from the configuration.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub prefix: String,
    pub query: Value,
    pub page_size: usize,
    pub concurrency: usize,
    pub keepalive: std::time::Duration,
    pub horizon_skew: Duration,
}

impl SyncSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            prefix: config.remote.index_prefix.clone(),
            query: config.predicate()?.to_query(),
            page_size: config.sync.page_size,
            concurrency: config.sync.concurrency,
            keepalive: config.remote.scroll_keepalive,
            horizon_skew: config.horizon_skew()?,
        })
    }
}

/// Partitions that are in the catalog, at or before the horizon, and not
/// yet checkpointed, in ascending order.
pub fn eligible_partitions(
    catalog: &[PartitionId],
    horizon: &Horizon,
    completed: &BTreeSet<PartitionId>,
) -> Vec<PartitionId> {
    let mut eligible: Vec<PartitionId> = catalog
        .iter()
        .filter(|p| horizon.is_safe(p))
        .filter(|p| !completed.contains(*p))
        .cloned()
        .collect();
    eligible.sort();
    eligible.dedup();
    eligible
}

/// Drives catalog, cursor, sink and checkpoint store for one run.
pub struct Syncer {
    catalog: Arc<dyn PartitionCatalog>,
    backend: Arc<dyn SearchBackend>,
    checkpoints: CheckpointStore,
    sink: WriteSink,
    settings: SyncSettings,
}

impl Syncer {
    pub fn new(
        catalog: Arc<dyn PartitionCatalog>,
        backend: Arc<dyn SearchBackend>,
        checkpoints: CheckpointStore,
        sink: WriteSink,
        settings: SyncSettings,
    ) -> Self {
        Self {
            catalog,
            backend,
            checkpoints,
            sink,
            settings,
        }
    }

    /// Compute `catalog ∩ {p ≤ horizon} − completed`.
    ///
    /// Errors here (catalog unreachable, database unavailable) are fatal to
    /// the run.
    pub async fn plan(&self, now: DateTime<Utc>) -> crate::error::Result<SyncPlan> {
        let horizon = Horizon::new(&self.settings.prefix, now, self.settings.horizon_skew)?;
        let catalog = self.catalog.list().await?;

        let safe: Vec<PartitionId> = catalog
            .iter()
            .filter(|p| horizon.is_safe(p))
            .cloned()
            .collect();
        let completed = self.checkpoints.completed(&safe).await?;
        let eligible = eligible_partitions(&catalog, &horizon, &completed);

        Ok(SyncPlan {
            horizon,
            catalog,
            completed,
            eligible,
        })
    }

    /// Run one incremental sync.
    pub async fn run(&self, options: &SyncOptions) -> crate::error::Result<SyncReport> {
        let plan = self.plan(options.now).await?;

        let mut eligible = plan.eligible.clone();
        if let Some(limit) = options.limit {
            eligible.truncate(limit);
        }

        info!(
            now = %options.now,
            horizon = %plan.horizon.last(),
            catalog = plan.catalog.len(),
            checkpointed = plan.completed.len(),
            eligible = eligible.len(),
            "sync started"
        );

        let mut report = SyncReport {
            horizon: Some(plan.horizon.last().clone()),
            catalog: plan.catalog.len(),
            eligible: eligible.clone(),
            ..Default::default()
        };

        if options.dry_run {
            info!("dry run, nothing scanned");
            return Ok(report);
        }

        let outcomes: Vec<(PartitionId, PartitionOutcome)> = stream::iter(eligible)
            .map(|partition| async move {
                let outcome = self.sync_partition(&partition).await;
                (partition, outcome)
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        for (partition, outcome) in outcomes {
            match outcome {
                PartitionOutcome::Succeeded(stats) => {
                    report.documents_scraped += stats.documents_scraped;
                    report.documents_written += stats.documents_written;
                    report.completed.push(partition);
                }
                PartitionOutcome::Failed(e) => {
                    report.failed.push((partition, e.to_string()));
                }
            }
        }
        report.completed.sort();
        report.failed.sort_by(|a, b| a.0.cmp(&b.0));

        info!(
            partitions_completed = report.completed.len(),
            partitions_failed = report.failed.len(),
            documents_scraped = report.documents_scraped,
            documents_written = report.documents_written,
            "sync finished"
        );

        Ok(report)
    }

    /// Drain one partition and checkpoint it. Never returns an error: any
    /// failure is logged and reported as [`PartitionOutcome::Failed`].
    pub async fn sync_partition(&self, partition: &PartitionId) -> PartitionOutcome {
        info!(partition = %partition, "scanning partition");

        match self.drain(partition).await {
            Ok(stats) => {
                info!(
                    partition = %partition,
                    pages = stats.pages,
                    fetches = stats.fetches,
                    documents_scraped = stats.documents_scraped,
                    documents_written = stats.documents_written,
                    "partition completed"
                );
                PartitionOutcome::Succeeded(stats)
            }
            Err(e) => {
                error!(
                    partition = %partition,
                    transient = e.is_transient(),
                    error = %e,
                    "partition failed, will retry next run"
                );
                PartitionOutcome::Failed(e)
            }
        }
    }

    async fn drain(&self, partition: &PartitionId) -> crate::error::Result<PartitionStats> {
        let mut cursor = PartitionCursor::new(
            self.backend.as_ref(),
            partition.clone(),
            self.settings.query.clone(),
            self.settings.page_size,
            self.settings.keepalive,
        );
        let mut stats = PartitionStats::default();

        while let Some(hits) = cursor.next_page().await? {
            if let Err(e) = self.write_page(&hits, partition, &mut stats).await {
                cursor.close().await;
                return Err(e);
            }
        }
        stats.fetches = cursor.fetches();

        if !self.checkpoints.mark_complete(partition, Utc::now()).await? {
            debug!(partition = %partition, "checkpoint already present");
        }

        Ok(stats)
    }

    async fn write_page(
        &self,
        hits: &[SearchHit],
        partition: &PartitionId,
        stats: &mut PartitionStats,
    ) -> crate::error::Result<()> {
        let documents = hits
            .iter()
            .map(Document::from_hit)
            .collect::<crate::error::Result<Vec<_>>>()?;
        let written = self.sink.apply(&documents, partition).await?;

        stats.pages += 1;
        stats.documents_scraped += documents.len() as u64;
        stats.documents_written += written;
        debug!(
            partition = %partition,
            page = stats.pages,
            documents = documents.len(),
            written,
            "page written"
        );
        Ok(())
    }
}

/// Build the production [`Syncer`]: HTTP catalog and backend, SQLite stores.
pub async fn connect(config: &Config) -> Result<(Syncer, RemoteClient, sqlx::SqlitePool)> {
    let client = RemoteClient::new(&config.remote)?;
    let pool = db::connect(config).await?;
    crate::migrate::migrate_pool(&pool).await?;

    let syncer = Syncer::new(
        Arc::new(RemoteCatalog::new(
            client.clone(),
            config.remote.index_prefix.clone(),
        )),
        Arc::new(client.clone()),
        CheckpointStore::new(pool.clone()),
        WriteSink::new(pool.clone()),
        SyncSettings::from_config(config)?,
    );

    Ok((syncer, client, pool))
}

/// Entry point for `logsync sync`.
pub async fn run_sync(config: &Config, options: SyncOptions, test_run: bool) -> Result<SyncReport> {
    let (syncer, client, pool) = connect(config).await?;

    if test_run && !client.is_local() {
        bail!(
            "--test-run only talks to a local remote store, but remote.base_url is {}",
            client.base_url()
        );
    }

    let report = syncer.run(&options).await?;
    pool.close().await;

    if options.dry_run {
        println!("sync (dry-run)");
    } else {
        println!("sync");
    }
    if let Some(horizon) = &report.horizon {
        println!("  horizon: {}", horizon);
    }
    println!("  partitions in catalog: {}", report.catalog);
    println!("  partitions eligible: {}", report.eligible.len());
    if options.dry_run {
        for partition in &report.eligible {
            println!("    {}", partition);
        }
    } else {
        println!("  partitions completed: {}", report.completed.len());
        println!("  partitions failed: {}", report.failed.len());
        for (partition, reason) in &report.failed {
            println!("    {}: {}", partition, reason);
        }
        println!("  documents scraped: {}", report.documents_scraped);
        println!("  documents written: {}", report.documents_written);
    }
    println!("ok");

    Ok(report)
}
