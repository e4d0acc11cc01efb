//! Paginated scan over one partition.
//!
//! A [`PartitionCursor`] drives the search/scroll protocol of a
//! [`SearchBackend`]: the first request carries the predicate and page size,
//! every later request carries only the continuation token. The scan ends at
//! the first page holding fewer than `page_size` hits. The server's total is
//! reported but never used to stop early, so a result set that is an exact
//! multiple of the page size costs one extra (empty) request.
//!
//! Cursors are single-use: once exhausted or failed they yield nothing, and
//! token state is never persisted between runs.

use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::models::SearchHit;
use crate::partition::PartitionId;
use crate::traits::SearchBackend;

enum State {
    NotStarted,
    Open(String),
    Done,
}

pub struct PartitionCursor<'a, B: SearchBackend + ?Sized> {
    backend: &'a B,
    partition: PartitionId,
    query: Value,
    page_size: usize,
    keepalive: Duration,
    state: State,
    fetches: usize,
    total: Option<u64>,
}

impl<'a, B: SearchBackend + ?Sized> PartitionCursor<'a, B> {
    pub fn new(
        backend: &'a B,
        partition: PartitionId,
        query: Value,
        page_size: usize,
        keepalive: Duration,
    ) -> Self {
        Self {
            backend,
            partition,
            query,
            page_size,
            keepalive,
            state: State::NotStarted,
            fetches: 0,
            total: None,
        }
    }

    /// Fetch the next page. Returns `Ok(None)` once the partition is drained.
    ///
    /// After an error the cursor is finished; the caller abandons the
    /// partition and a later run starts a fresh scan.
    pub async fn next_page(&mut self) -> Result<Option<Vec<SearchHit>>> {
        let response = match std::mem::replace(&mut self.state, State::Done) {
            State::Done => return Ok(None),
            State::NotStarted => {
                self.backend
                    .open(
                        self.partition.as_str(),
                        &self.query,
                        self.page_size,
                        self.keepalive,
                    )
                    .await
            }
            State::Open(token) => match self.backend.next(&token, self.keepalive).await {
                Ok(page) => Ok(page),
                Err(e) => {
                    self.release(&token).await;
                    Err(e)
                }
            },
        };
        self.fetches += 1;
        let page = response?;

        if self.total.is_none() {
            self.total = Some(page.total);
        }

        let short = page.hits.len() < self.page_size;
        debug!(
            partition = %self.partition,
            fetch = self.fetches,
            hits = page.hits.len(),
            total = page.total,
            "fetched page"
        );

        match (short, page.scroll_id) {
            (true, Some(token)) => self.release(&token).await,
            (true, None) => {}
            (false, Some(token)) => self.state = State::Open(token),
            (false, None) => {
                return Err(SyncError::Decode(format!(
                    "full page from '{}' without a continuation token",
                    self.partition
                )))
            }
        }

        if page.hits.is_empty() {
            Ok(None)
        } else {
            Ok(Some(page.hits))
        }
    }

    /// Number of requests issued so far.
    pub fn fetches(&self) -> usize {
        self.fetches
    }

    /// Total matches reported by the first response, if any.
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, State::Done)
    }

    /// Abandon the scan, releasing the continuation token if one is open.
    pub async fn close(mut self) {
        if let State::Open(token) = std::mem::replace(&mut self.state, State::Done) {
            self.release(&token).await;
        }
    }

    async fn release(&self, token: &str) {
        if let Err(e) = self.backend.release(token).await {
            debug!(partition = %self.partition, error = %e, "failed to release scroll context");
        }
    }
}
