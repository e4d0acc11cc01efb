//! Error taxonomy for the sync pipeline.
//!
//! Every failure inside a partition's scan-then-write loop is a
//! [`SyncError`]. The orchestrator catches these per partition, logs them,
//! and leaves the partition un-checkpointed so the next run retries it.
//!
//! | Variant | Class | Effect |
//! |---------|-------|--------|
//! | [`Remote`](SyncError::Remote), [`Transport`](SyncError::Transport), [`Decode`](SyncError::Decode) | transient fetch | aborts the partition |
//! | [`MalformedDocument`](SyncError::MalformedDocument) | malformed data | aborts the partition |
//! | [`Database`](SyncError::Database) | storage | aborts the partition (unique violations are filtered out earlier) |
//! | [`InvalidPartition`](SyncError::InvalidPartition), [`InvalidRule`](SyncError::InvalidRule), [`InvalidHorizon`](SyncError::InvalidHorizon) | configuration | fatal to the run |

use reqwest::header::HeaderMap;
use reqwest::StatusCode;

/// Errors raised by the catalog, cursor, checkpoint store and write sink.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The remote store answered with a non-2xx status or an `error` body.
    #[error("remote store returned {status}\n  headers: {headers}\n  body: {body}")]
    Remote {
        status: StatusCode,
        headers: String,
        body: String,
    },

    /// The request never produced a response (connect, timeout, TLS).
    #[error("remote store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body was not the JSON shape we expect.
    #[error("unexpected response from remote store: {0}")]
    Decode(String),

    /// A fetched document lacks a field the `documents` table requires.
    #[error("document '{document_id}' is missing required field '{field}'")]
    MalformedDocument { document_id: String, field: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid partition name '{0}'")]
    InvalidPartition(String),

    #[error("invalid match rule: {0}")]
    InvalidRule(String),

    #[error("horizon out of range: {0}")]
    InvalidHorizon(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Build a [`SyncError::Remote`] from the parts of a failed response.
    pub fn remote(status: StatusCode, headers: &HeaderMap, body: String) -> Self {
        let headers = headers
            .iter()
            .map(|(k, v)| format!("{}={}", k, v.to_str().unwrap_or("<binary>")))
            .collect::<Vec<_>>()
            .join("; ");
        SyncError::Remote {
            status,
            headers,
            body,
        }
    }

    /// Whether this is a fetch-side failure that a later run may not hit again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Remote { .. } | SyncError::Transport(_) | SyncError::Decode(_)
        )
    }
}

/// Returns true when `err` is a uniqueness violation reported by the database.
///
/// Both the checkpoint insert and the document guard treat this as success.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}
