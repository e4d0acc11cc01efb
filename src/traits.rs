//! Extension seams for the remote side of the pipeline.
//!
//! The orchestrator talks to the remote store only through these two
//! traits, so the HTTP client can be swapped for an in-memory store in
//! tests or for a different search engine that speaks the same
//! request/continuation-token protocol.
//!
//! ```text
//! ┌──────────────────┐      ┌──────────────────┐
//! │ PartitionCatalog │      │  SearchBackend   │
//! │  list() → names  │      │ open/next/release│
//! └────────┬─────────┘      └────────┬─────────┘
//!          ▼                         ▼
//!     eligibility              PartitionCursor
//!          └──────────┬──────────────┘
//!                     ▼
//!                 run_sync()
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::Result;
use crate::models::ScrollPage;
use crate::partition::PartitionId;

/// Lists the partitions known to the remote store.
#[async_trait]
pub trait PartitionCatalog: Send + Sync {
    /// Every valid partition, sorted ascending (oldest first).
    async fn list(&self) -> Result<Vec<PartitionId>>;
}

/// The paginated search protocol of the remote store.
///
/// [`open`](SearchBackend::open) submits the filter and page size and
/// returns the first page together with a continuation token;
/// [`next`](SearchBackend::next) takes only the token. Tokens expire after
/// `keepalive`; an expired token is an error, not a silent restart.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn open(
        &self,
        partition: &str,
        query: &Value,
        size: usize,
        keepalive: Duration,
    ) -> Result<ScrollPage>;

    async fn next(&self, scroll_id: &str, keepalive: Duration) -> Result<ScrollPage>;

    /// Free the server-side state behind `scroll_id`. Best effort.
    async fn release(&self, _scroll_id: &str) -> Result<()> {
        Ok(())
    }
}
