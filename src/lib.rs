//! # logsync
//!
//! Incremental, checkpointed sync of time-partitioned log indices from a
//! remote document-search store (Elasticsearch) into a relational store
//! (SQLite).
//!
//! Each hourly partition is scanned exactly once to completion: matching
//! documents are paged out with a scroll cursor, written with an idempotent
//! existence-guarded insert, and the partition is checkpointed only after it
//! has been fully drained. Runs are periodic catch-ups; a run that fails
//! part-way simply leaves work for the next one.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Remote store │──▶│   Pipeline   │──▶│    SQLite    │
//! │ catalog/scroll│  │ cursor → sink│   │ documents +  │
//! └──────────────┘   └──────┬───────┘   │ log_entries  │
//!                           │           └──────────────┘
//!                    checkpoint per partition
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! logsync init                    # create tables
//! logsync populate                # seed a local store with test data
//! logsync sync --test-run         # sync with a fixed clock
//! logsync status                  # what the next run would do
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`error`] | Pipeline error taxonomy |
//! | [`partition`] | Partition names and the scan horizon |
//! | [`models`] | Core data types |
//! | [`predicate`] | Match rules → search query |
//! | [`remote`] | Remote store HTTP client |
//! | [`traits`] | Catalog and search backend seams |
//! | [`catalog`] | Remote partition catalog |
//! | [`cursor`] | Per-partition paginated scan |
//! | [`db`] | Database connection pool |
//! | [`migrate`] | Schema migrations |
//! | [`checkpoint`] | Completed-partition records |
//! | [`sink`] | Idempotent batched writes |
//! | [`ingest`] | Sync orchestration |
//! | [`status`] | Eligibility report |
//! | [`populate`] | Synthetic test data |

pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod cursor;
pub mod db;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod partition;
pub mod populate;
pub mod predicate;
pub mod remote;
pub mod sink;
pub mod status;
pub mod traits;
