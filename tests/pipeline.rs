//! Orchestrator behaviour against a real SQLite database and an in-memory
//! remote store.
//!
//! The in-memory store implements both [`PartitionCatalog`] and
//! [`SearchBackend`], evaluates the match predicate itself, and can be told
//! to fail a specific fetch of a specific partition once.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use logsync::checkpoint::CheckpointStore;
use logsync::config::{load_config, Config};
use logsync::db;
use logsync::error::{Result, SyncError};
use logsync::ingest::{PartitionOutcome, SyncOptions, SyncSettings, Syncer};
use logsync::migrate::migrate_pool;
use logsync::models::{Document, ScrollPage, SearchHit};
use logsync::partition::PartitionId;
use logsync::predicate::{default_rules, MatchPredicate};
use logsync::sink::WriteSink;
use logsync::traits::{PartitionCatalog, SearchBackend};
use serde_json::{json, Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const PREFIX: &str = "junoslogs-";

// ─── In-memory remote store ─────────────────────────────────────────

struct Scroll {
    partition: String,
    offset: usize,
    size: usize,
    fetches: usize,
}

#[derive(Default)]
struct MemoryStore {
    partitions: BTreeMap<String, Vec<SearchHit>>,
    predicate: Option<MatchPredicate>,
    scrolls: Mutex<HashMap<String, Scroll>>,
    next_scroll: Mutex<usize>,
    /// partition → fetch number (1-based) that fails once
    fail_at: Mutex<HashMap<String, usize>>,
    /// every request, as `"<partition>:<fetch>"`
    calls: Mutex<Vec<String>>,
}

impl MemoryStore {
    fn new() -> Self {
        Self {
            predicate: Some(MatchPredicate::build(&default_rules()).unwrap()),
            ..Default::default()
        }
    }

    fn with_partition(mut self, name: &str, hits: Vec<SearchHit>) -> Self {
        self.partitions.insert(name.to_string(), hits);
        self
    }

    fn fail_once(&self, partition: &str, fetch: usize) {
        self.fail_at
            .lock()
            .unwrap()
            .insert(partition.to_string(), fetch);
    }

    fn fetches_for(&self, partition: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(&format!("{}:", partition)))
            .count()
    }

    fn serve(&self, scroll_id: String) -> Result<ScrollPage> {
        let mut scrolls = self.scrolls.lock().unwrap();
        let scroll = scrolls
            .get_mut(&scroll_id)
            .ok_or_else(|| SyncError::Decode(format!("unknown scroll {}", scroll_id)))?;
        scroll.fetches += 1;

        self.calls
            .lock()
            .unwrap()
            .push(format!("{}:{}", scroll.partition, scroll.fetches));

        let mut fail_at = self.fail_at.lock().unwrap();
        if fail_at.get(&scroll.partition) == Some(&scroll.fetches) {
            fail_at.remove(&scroll.partition);
            return Err(SyncError::Decode("search_context_missing_exception".to_string()));
        }

        let matching: Vec<&SearchHit> = self.partitions[&scroll.partition]
            .iter()
            .filter(|h| {
                self.predicate
                    .as_ref()
                    .map(|p| p.matches(&h.source))
                    .unwrap_or(true)
            })
            .collect();
        let end = (scroll.offset + scroll.size).min(matching.len());
        let hits: Vec<SearchHit> = matching[scroll.offset.min(end)..end]
            .iter()
            .map(|h| (*h).clone())
            .collect();
        scroll.offset = end;

        Ok(ScrollPage {
            scroll_id: Some(scroll_id),
            total: matching.len() as u64,
            hits,
        })
    }
}

#[async_trait]
impl PartitionCatalog for MemoryStore {
    async fn list(&self) -> Result<Vec<PartitionId>> {
        let mut ids = self
            .partitions
            .keys()
            .map(|name| PartitionId::parse(PREFIX, name))
            .collect::<Result<Vec<_>>>()?;
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl SearchBackend for MemoryStore {
    async fn open(
        &self,
        partition: &str,
        _query: &Value,
        size: usize,
        _keepalive: std::time::Duration,
    ) -> Result<ScrollPage> {
        let id = {
            let mut next = self.next_scroll.lock().unwrap();
            *next += 1;
            format!("scroll-{}", next)
        };
        self.scrolls.lock().unwrap().insert(
            id.clone(),
            Scroll {
                partition: partition.to_string(),
                offset: 0,
                size,
                fetches: 0,
            },
        );
        self.serve(id)
    }

    async fn next(&self, scroll_id: &str, _keepalive: std::time::Duration) -> Result<ScrollPage> {
        self.serve(scroll_id.to_string())
    }

    async fn release(&self, scroll_id: &str) -> Result<()> {
        self.scrolls.lock().unwrap().remove(scroll_id);
        Ok(())
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────

fn source(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap()
}

/// A document matching the default firewall rule.
fn matching_hit(id: usize) -> SearchHit {
    SearchHit {
        id: format!("doc-{}", id),
        source: source(json!({
            "event_category": "firewall",
            "event_type": "RT_FLOW_SESSION_CLOSE",
            "event_timestamp": "2023-01-02T03:04:05+00:00",
            "reason": "Closed by junos-dynapp",
            "source_zone": "crew-Wired",
            "host": "10.0.0.1"
        })),
    }
}

/// A document no default rule matches.
fn other_hit(id: usize) -> SearchHit {
    SearchHit {
        id: format!("other-{}", id),
        source: source(json!({
            "event_category": "firewall",
            "event_type": "RT_FLOW_SESSION_CREATE",
            "event_timestamp": "2023-01-02T03:04:05+00:00",
            "source_zone": "business-Wired"
        })),
    }
}

fn hits(n: usize) -> Vec<SearchHit> {
    (0..n).map(matching_hit).collect()
}

fn name(hour: u32) -> String {
    format!("{}2023.01.02-{:02}", PREFIX, hour)
}

fn pid(hour: u32) -> PartitionId {
    PartitionId::parse(PREFIX, &name(hour)).unwrap()
}

/// A clock whose horizon (now − 2h) lands exactly on `hour` of 2023-01-02.
fn now_with_horizon_at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 2, hour, 30, 0).unwrap() + Duration::hours(2)
}

struct Harness {
    _dir: TempDir,
    pool: SqlitePool,
    config: Config,
}

async fn harness(concurrency: usize) -> Harness {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("logsync.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
            [db]
            path = "{}/data/logsync.sqlite"

            [remote]
            base_url = "http://localhost:9200"

            [sync]
            concurrency = {}
            "#,
            dir.path().display(),
            concurrency
        ),
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    let pool = db::connect(&config).await.unwrap();
    migrate_pool(&pool).await.unwrap();

    Harness {
        _dir: dir,
        pool,
        config,
    }
}

impl Harness {
    fn syncer(&self, store: Arc<MemoryStore>, page_size: usize) -> Syncer {
        self.syncer_on(self.pool.clone(), store, page_size)
    }

    fn syncer_on(&self, pool: SqlitePool, store: Arc<MemoryStore>, page_size: usize) -> Syncer {
        let mut settings = SyncSettings::from_config(&self.config).unwrap();
        settings.page_size = page_size;
        Syncer::new(
            store.clone(),
            store,
            CheckpointStore::new(pool.clone()),
            WriteSink::new(pool),
            settings,
        )
    }

    /// An independent pool of one connection on the same database file.
    async fn single_connection_pool(&self, busy_timeout: std::time::Duration) -> SqlitePool {
        let options = SqliteConnectOptions::new()
            .filename(&self.config.db.path)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout);
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap()
    }

    fn checkpoints(&self) -> CheckpointStore {
        CheckpointStore::new(self.pool.clone())
    }

    async fn row_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }

    async fn rows_in(&self, partition: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE index_name = ?")
            .bind(partition)
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}

fn options(now: DateTime<Utc>) -> SyncOptions {
    SyncOptions {
        now,
        dry_run: false,
        limit: None,
    }
}

// ─── Properties ─────────────────────────────────────────────────────

#[tokio::test]
async fn rerun_produces_no_duplicate_rows() {
    let h = harness(2).await;
    let store = Arc::new(
        MemoryStore::new()
            .with_partition(&name(1), hits(25))
            .with_partition(&name(2), hits(10))
            .with_partition(&name(3), hits(7)),
    );
    let syncer = h.syncer(store, 10);

    let first = syncer.run(&options(now_with_horizon_at(3))).await.unwrap();
    assert_eq!(first.completed.len(), 3);
    assert_eq!(first.documents_written, 42);
    assert_eq!(h.row_count().await, 42);

    let second = syncer.run(&options(now_with_horizon_at(3))).await.unwrap();
    assert!(second.eligible.is_empty());
    assert_eq!(h.row_count().await, 42);

    // Even with checkpoints gone, a full rescan writes nothing new.
    sqlx::query("DELETE FROM log_entries")
        .execute(&h.pool)
        .await
        .unwrap();
    let third = syncer.run(&options(now_with_horizon_at(3))).await.unwrap();
    assert_eq!(third.completed.len(), 3);
    assert_eq!(third.documents_scraped, 42);
    assert_eq!(third.documents_written, 0);
    assert_eq!(h.row_count().await, 42);
}

#[tokio::test]
async fn partitions_past_the_horizon_are_never_eligible() {
    let h = harness(2).await;
    let store = Arc::new(
        (1..=5).fold(MemoryStore::new(), |s, hour| {
            s.with_partition(&name(hour), hits(3))
        }),
    );
    let syncer = h.syncer(store, 10);

    let plan = syncer.plan(now_with_horizon_at(4)).await.unwrap();
    assert_eq!(plan.horizon.last(), &pid(4));
    assert_eq!(plan.eligible, vec![pid(1), pid(2), pid(3), pid(4)]);

    let report = syncer.run(&options(now_with_horizon_at(4))).await.unwrap();
    assert_eq!(report.completed, vec![pid(1), pid(2), pid(3), pid(4)]);
    assert_eq!(h.rows_in(&name(5)).await, 0);

    let plan = syncer.plan(now_with_horizon_at(4)).await.unwrap();
    assert!(plan.eligible.is_empty());
    let done = h.checkpoints().completed(&[pid(5)]).await.unwrap();
    assert!(done.is_empty());
}

#[tokio::test]
async fn checkpointed_partitions_are_skipped() {
    let h = harness(2).await;
    let store = Arc::new(
        (1..=4).fold(MemoryStore::new(), |s, hour| {
            s.with_partition(&name(hour), hits(3))
        }),
    );
    h.checkpoints().mark_complete(&pid(1), Utc::now()).await.unwrap();
    h.checkpoints().mark_complete(&pid(2), Utc::now()).await.unwrap();

    let syncer = h.syncer(store.clone(), 10);
    let plan = syncer.plan(now_with_horizon_at(6)).await.unwrap();
    assert_eq!(plan.eligible, vec![pid(3), pid(4)]);

    syncer.run(&options(now_with_horizon_at(6))).await.unwrap();
    assert_eq!(store.fetches_for(&name(1)), 0);
    assert_eq!(store.fetches_for(&name(2)), 0);
    assert_eq!(h.rows_in(&name(1)).await, 0);
    assert_eq!(h.rows_in(&name(3)).await, 3);
}

#[tokio::test]
async fn one_failing_partition_does_not_affect_others() {
    let h = harness(2).await;
    let store = Arc::new(
        MemoryStore::new()
            .with_partition(&name(3), hits(25))
            .with_partition(&name(4), hits(25)),
    );
    store.fail_once(&name(4), 2);
    let syncer = h.syncer(store.clone(), 10);

    let report = syncer.run(&options(now_with_horizon_at(4))).await.unwrap();
    assert_eq!(report.completed, vec![pid(3)]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, pid(4));
    assert!(report.failed[0].1.contains("search_context_missing_exception"));

    let done = h.checkpoints().completed(&[pid(3), pid(4)]).await.unwrap();
    assert_eq!(done.into_iter().collect::<Vec<_>>(), vec![pid(3)]);
    // the first page of P4 was written before the failure
    assert_eq!(h.rows_in(&name(4)).await, 10);

    let plan = syncer.plan(now_with_horizon_at(4)).await.unwrap();
    assert_eq!(plan.eligible, vec![pid(4)]);

    // Next run rescans P4 from scratch without duplicating the first page.
    let retry = syncer.run(&options(now_with_horizon_at(4))).await.unwrap();
    assert_eq!(retry.completed, vec![pid(4)]);
    assert_eq!(retry.documents_scraped, 25);
    assert_eq!(retry.documents_written, 15);
    assert_eq!(h.rows_in(&name(4)).await, 25);
}

#[tokio::test]
async fn pagination_ends_on_the_short_page() {
    let h = harness(1).await;
    let store = Arc::new(MemoryStore::new().with_partition(&name(1), hits(2400)));
    let syncer = h.syncer(store.clone(), 1000);

    match syncer.sync_partition(&pid(1)).await {
        PartitionOutcome::Succeeded(stats) => {
            assert_eq!(stats.fetches, 3);
            assert_eq!(stats.pages, 3);
            assert_eq!(stats.documents_written, 2400);
        }
        PartitionOutcome::Failed(e) => panic!("partition failed: {}", e),
    }
    assert_eq!(store.fetches_for(&name(1)), 3);
}

#[tokio::test]
async fn same_document_across_runs_is_stored_once() {
    let h = harness(1).await;
    let sink = WriteSink::new(h.pool.clone());
    let doc = Document::from_hit(&matching_hit(7)).unwrap();

    assert_eq!(sink.apply(&[doc.clone()], &pid(1)).await.unwrap(), 1);
    assert_eq!(sink.apply(&[doc.clone()], &pid(1)).await.unwrap(), 0);
    // same id in another partition is a different row
    assert_eq!(sink.apply(&[doc.clone()], &pid(2)).await.unwrap(), 1);
    // duplicates inside one page collapse as well
    assert_eq!(
        sink.apply(&[doc.clone(), doc.clone()], &pid(3)).await.unwrap(),
        1
    );
    assert_eq!(h.row_count().await, 3);
}

#[tokio::test]
async fn large_pages_are_split_across_statements() {
    let h = harness(1).await;
    let sink = WriteSink::new(h.pool.clone());
    let docs: Vec<Document> = hits(1000)
        .iter()
        .map(|hit| Document::from_hit(hit).unwrap())
        .collect();

    assert_eq!(sink.apply(&docs, &pid(1)).await.unwrap(), 1000);
    assert_eq!(sink.apply(&docs[..600], &pid(1)).await.unwrap(), 0);
    assert_eq!(h.rows_in(&name(1)).await, 1000);
}

#[tokio::test]
async fn malformed_document_fails_the_partition() {
    let h = harness(2).await;
    let mut broken = hits(5);
    broken[3].source.remove("event_type");
    // the default rules filter on event_type, so serve every hit unfiltered
    let mut store = MemoryStore::new()
        .with_partition(&name(1), hits(5))
        .with_partition(&name(2), broken);
    store.predicate = None;
    let store = Arc::new(store);
    let syncer = h.syncer(store, 10);

    let report = syncer.run(&options(now_with_horizon_at(2))).await.unwrap();
    assert_eq!(report.completed, vec![pid(1)]);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].1.contains("event_type"));
    assert_eq!(h.rows_in(&name(2)).await, 0);

    let done = h.checkpoints().completed(&[pid(2)]).await.unwrap();
    assert!(done.is_empty());
}

#[tokio::test]
async fn non_matching_documents_are_not_ingested() {
    let h = harness(1).await;
    let mut docs = hits(4);
    docs.extend((0..6).map(other_hit));
    let store = Arc::new(MemoryStore::new().with_partition(&name(1), docs));
    let syncer = h.syncer(store, 3);

    let report = syncer.run(&options(now_with_horizon_at(1))).await.unwrap();
    assert_eq!(report.documents_scraped, 4);
    assert_eq!(h.rows_in(&name(1)).await, 4);
}

#[tokio::test]
async fn many_partitions_with_bounded_concurrency() {
    let h = harness(4).await;
    let store = Arc::new(
        (0..24).fold(MemoryStore::new(), |s, hour| {
            s.with_partition(&name(hour), hits(30))
        }),
    );
    let syncer = h.syncer(store, 7);

    let report = syncer.run(&options(now_with_horizon_at(23))).await.unwrap();
    assert_eq!(report.completed.len(), 24);
    assert!(report.failed.is_empty());
    assert_eq!(h.row_count().await, 24 * 30);
}

#[tokio::test]
async fn dry_run_and_limit() {
    let h = harness(2).await;
    let store = Arc::new(
        (1..=4).fold(MemoryStore::new(), |s, hour| {
            s.with_partition(&name(hour), hits(2))
        }),
    );
    let syncer = h.syncer(store.clone(), 10);

    let dry = syncer
        .run(&SyncOptions {
            now: now_with_horizon_at(4),
            dry_run: true,
            limit: None,
        })
        .await
        .unwrap();
    assert_eq!(dry.eligible.len(), 4);
    assert!(dry.completed.is_empty());
    assert!(store.calls.lock().unwrap().is_empty());

    let limited = syncer
        .run(&SyncOptions {
            now: now_with_horizon_at(4),
            dry_run: false,
            limit: Some(2),
        })
        .await
        .unwrap();
    assert_eq!(limited.completed, vec![pid(1), pid(2)]);

    let plan = syncer.plan(now_with_horizon_at(4)).await.unwrap();
    assert_eq!(plan.eligible, vec![pid(3), pid(4)]);
}

fn shared_store(partitions: u32, docs: usize) -> MemoryStore {
    (0..partitions).fold(MemoryStore::new(), |s, hour| {
        s.with_partition(&name(hour), hits(docs))
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_on_separate_pools_store_each_document_once() {
    let h = harness(4).await;
    let other_pool = db::connect(&h.config).await.unwrap();

    let a = h.syncer(Arc::new(shared_store(8, 600)), 50);
    let b = h.syncer_on(other_pool, Arc::new(shared_store(8, 600)), 50);

    let opts = options(now_with_horizon_at(7));
    let (ra, rb) = tokio::join!(a.run(&opts), b.run(&opts));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert!(ra.failed.is_empty(), "first run failed: {:?}", ra.failed);
    assert!(rb.failed.is_empty(), "second run failed: {:?}", rb.failed);
    assert_eq!(ra.completed.len(), 8);
    assert_eq!(rb.completed.len(), 8);
    assert_eq!(ra.documents_written + rb.documents_written, 8 * 600);
    assert_eq!(h.row_count().await, 8 * 600);

    let done = h
        .checkpoints()
        .completed(&(0..8).map(pid).collect::<Vec<_>>())
        .await
        .unwrap();
    assert_eq!(done.len(), 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_page_write_does_not_hold_the_write_lock() {
    let h = harness(1).await;
    let docs: Vec<Document> = hits(20_000)
        .iter()
        .map(|hit| Document::from_hit(hit).unwrap())
        .collect();

    let sink = WriteSink::new(h.single_connection_pool(std::time::Duration::from_secs(5)).await);
    let _ = tokio::time::timeout(
        std::time::Duration::from_millis(5),
        sink.apply(&docs, &pid(1)),
    )
    .await;

    // the same connection can start a new page
    let doc = Document::from_hit(&matching_hit(999_999)).unwrap();
    assert_eq!(sink.apply(&[doc.clone()], &pid(2)).await.unwrap(), 1);

    // and another pool is not locked out
    let other = WriteSink::new(h.single_connection_pool(std::time::Duration::from_secs(5)).await);
    assert_eq!(other.apply(&[doc], &pid(3)).await.unwrap(), 1);

    // the cancelled page is all or nothing
    let stored = h.rows_in(&name(1)).await;
    assert!(stored == 0 || stored == 20_000, "partial page: {}", stored);
}

#[tokio::test]
async fn failed_page_write_releases_the_scroll() {
    let h = harness(1).await;
    let mut broken = hits(25);
    broken[3].source.remove("event_type");
    let mut store = MemoryStore::new().with_partition(&name(1), broken);
    store.predicate = None;
    let store = Arc::new(store);
    let syncer = h.syncer(store.clone(), 10);

    let report = syncer.run(&options(now_with_horizon_at(1))).await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(store.fetches_for(&name(1)), 1);
    assert!(store.scrolls.lock().unwrap().is_empty());
}
