//! Synthetic data for local testing.
//!
//! `logsync populate` creates hourly partitions for `days` days starting at
//! 2023-01-01T00:00Z (`<prefix>2023.01.01-00` onwards) and fills each with `docs`
//! Junos-style syslog documents. Together with `sync --test-run` (which pins
//! "now" to 2023-01-02T09:00Z) this exercises the whole pipeline against a
//! local store.
//!
//! Document ids are deterministic (`1..=docs`), so running populate twice
//! overwrites rather than duplicates.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::info;

use crate::config::Config;
use crate::partition::PartitionId;
use crate::remote::RemoteClient;

/// Parallel index/document requests in flight.
const CONCURRENCY: usize = 8;

/// Partitions for `days` days × 24 hours, oldest first.
pub fn synthetic_partitions(prefix: &str, days: u32) -> Vec<PartitionId> {
    // 2023-01-01T00:00:00Z
    let start = DateTime::<Utc>::default() + Duration::seconds(1_672_531_200);
    (0..i64::from(days) * 24)
        .map(|h| PartitionId::for_hour(prefix, start + Duration::hours(h)))
        .collect()
}

/// The `i`-th synthetic document. Every third document matches no default
/// rule, so the predicate filter is visible in the results.
pub fn synthetic_document(i: u32) -> Value {
    let minute = i % 60;
    let timestamp = format!("2023-01-01T08:{:02}:28+00:00", minute);
    match i % 3 {
        0 => json!({
            "event_category": "apptrack",
            "event_type": "APPTRACK_SESSION_CLOSE",
            "event_timestamp": timestamp,
            "reason": "Closed by junos-dynapp",
            "application": "BITTORRENT",
            "nested_application": "UNKNOWN",
            "host": "10.255.12.235",
            "syslog_hostname": "vSRX.apollogr",
            "source_zone": "business-Wired",
            "source_zone_name": "business-Wired",
            "category": "P2P",
            "sub_category": "File-Sharing",
            "source_address": "172.16.27.116",
            "destination_address": "239.192.152.143",
            "destination_port": "6771",
            "protocol_id": "17",
            "bytes_from_client": "366",
            "bytes_from_server": "74",
            "severity": 0
        }),
        1 => json!({
            "event_category": "firewall",
            "event_type": "RT_FLOW_SESSION_CLOSE",
            "event_timestamp": timestamp,
            "reason": "Closed by junos-dynapp",
            "host": "10.255.12.236",
            "syslog_hostname": "vSRX.apollogr",
            "source_zone": "crew-Wired",
            "application": "HTTPS",
            "source_address": "172.16.40.12",
            "destination_address": "142.250.184.110",
            "destination_port": "443",
            "severity": 0
        }),
        _ => json!({
            "event_category": "firewall",
            "event_type": "RT_FLOW_SESSION_CREATE",
            "event_timestamp": timestamp,
            "host": "10.255.12.236",
            "syslog_hostname": "vSRX.apollogr",
            "source_zone": "business-Wired",
            "severity": 0
        }),
    }
}

pub async fn run_populate(config: &Config, days: u32, docs: u32) -> Result<()> {
    let client = RemoteClient::new(&config.remote)?;
    let existing: HashSet<String> = client
        .list_indices()
        .await
        .context("failed to list existing indices")?
        .into_iter()
        .collect();

    let partitions = synthetic_partitions(&config.remote.index_prefix, days);

    stream::iter(partitions.iter().filter(|p| !existing.contains(p.as_str())))
        .map(|index| {
            let client = &client;
            async move {
                info!(index = %index, "creating index");
                client
                    .create_index(index.as_str())
                    .await
                    .with_context(|| format!("failed to create index {}", index))
            }
        })
        .buffer_unordered(CONCURRENCY)
        .try_collect::<Vec<()>>()
        .await?;

    let requests = partitions
        .iter()
        .flat_map(|index| (1..=docs).map(move |i| (index, i)));

    stream::iter(requests)
        .map(|(index, i)| {
            let client = &client;
            async move {
                if i % 50 == 0 {
                    info!(index = %index, document = i, "indexing documents");
                }
                client
                    .index_document(index.as_str(), &i.to_string(), &synthetic_document(i))
                    .await
                    .with_context(|| format!("failed to index document {} in {}", i, index))
            }
        })
        .buffer_unordered(CONCURRENCY)
        .try_collect::<Vec<()>>()
        .await?;

    println!("populate");
    println!("  partitions: {}", partitions.len());
    println!("  documents per partition: {}", docs);
    println!("ok");
    Ok(())
}
