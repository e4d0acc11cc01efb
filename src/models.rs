//! Core data models used throughout logsync.
//!
//! These types represent the hits returned by the remote store, the
//! relational projection written to the `documents` table, and the
//! checkpoint records that mark partitions as done.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{Result, SyncError};
use crate::partition::PartitionId;

/// A raw search hit: the store-assigned id plus its `_source` object.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub source: Map<String, Value>,
}

/// One response of the search/scroll protocol.
#[derive(Debug, Clone)]
pub struct ScrollPage {
    /// Continuation token for the next request, if the server issued one.
    pub scroll_id: Option<String>,
    /// Total number of matching documents, as reported by the server.
    pub total: u64,
    pub hits: Vec<SearchHit>,
}

/// A log document projected onto the `documents` table columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub document_id: String,
    pub event_category: String,
    pub event_timestamp: DateTime<Utc>,
    pub event_type: String,
    pub host: Option<String>,
    pub syslog_hostname: Option<String>,
    pub source_zone: Option<String>,
    pub application: Option<String>,
    pub reason: Option<String>,
    pub category: Option<String>,
    pub url: Option<String>,
    pub attack_name: Option<String>,
    pub threat_severity: Option<String>,
}

impl Document {
    /// Project a search hit onto the relational columns.
    ///
    /// `event_category`, `event_timestamp` and `event_type` are required; a
    /// hit without them is rejected rather than stored half-empty. All other
    /// columns are nullable and default to `None` when absent.
    pub fn from_hit(hit: &SearchHit) -> Result<Self> {
        let required = |field: &str| -> Result<String> {
            scalar(&hit.source, field).ok_or_else(|| SyncError::MalformedDocument {
                document_id: hit.id.clone(),
                field: field.to_string(),
            })
        };

        let raw_ts = required("event_timestamp")?;
        let event_timestamp = DateTime::parse_from_rfc3339(&raw_ts)
            .map_err(|_| SyncError::MalformedDocument {
                document_id: hit.id.clone(),
                field: "event_timestamp".to_string(),
            })?
            .with_timezone(&Utc);

        Ok(Self {
            document_id: hit.id.clone(),
            event_category: required("event_category")?,
            event_timestamp,
            event_type: required("event_type")?,
            host: scalar(&hit.source, "host"),
            syslog_hostname: scalar(&hit.source, "syslog_hostname"),
            source_zone: scalar(&hit.source, "source_zone"),
            application: scalar(&hit.source, "application"),
            reason: scalar(&hit.source, "reason"),
            category: scalar(&hit.source, "category"),
            url: scalar(&hit.source, "url"),
            attack_name: scalar(&hit.source, "attack_name"),
            threat_severity: scalar(&hit.source, "threat_severity"),
        })
    }
}

/// Read `field` as a string, stringifying numbers and booleans.
fn scalar(source: &Map<String, Value>, field: &str) -> Option<String> {
    match source.get(field)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// A row of the `log_entries` table.
#[derive(Debug, Clone)]
pub struct CheckpointRecord {
    pub partition: PartitionId,
    pub completed_at: DateTime<Utc>,
}
