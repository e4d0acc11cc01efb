//! Partition identifiers and the scan horizon.
//!
//! The remote store shards documents into one index per hour, named
//! `<prefix>YYYY.MM.DD-HH` (e.g. `junoslogs-2023.01.02-09`). Ordering
//! partitions by plain string comparison is only chronological because every
//! numeric field is fixed-width and zero-padded, so [`PartitionId::parse`]
//! rejects any name that does not follow that exact layout and
//! [`PartitionId::for_hour`] always emits it.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use std::cmp::Ordering;
use std::fmt;

use crate::error::{Result, SyncError};

/// Length of the `YYYY.MM.DD-HH` suffix.
const SUFFIX_LEN: usize = 13;

/// A validated, chronologically ordered partition (index) name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionId {
    name: String,
    hour: NaiveDateTime,
}

impl PartitionId {
    /// Parse `name`, requiring it to be `prefix` followed by a zero-padded
    /// `YYYY.MM.DD-HH` stamp that denotes a real calendar hour.
    pub fn parse(prefix: &str, name: &str) -> Result<Self> {
        let invalid = || SyncError::InvalidPartition(name.to_string());

        let suffix = name.strip_prefix(prefix).ok_or_else(invalid)?;
        let bytes = suffix.as_bytes();
        if bytes.len() != SUFFIX_LEN
            || bytes[4] != b'.'
            || bytes[7] != b'.'
            || bytes[10] != b'-'
        {
            return Err(invalid());
        }

        let field = |range: std::ops::Range<usize>| -> Result<u32> {
            let s = &suffix[range];
            if !s.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            s.parse::<u32>().map_err(|_| invalid())
        };

        let year = field(0..4)?;
        let month = field(5..7)?;
        let day = field(8..10)?;
        let hour = field(11..13)?;

        let hour = NaiveDate::from_ymd_opt(year as i32, month, day)
            .and_then(|d| d.and_hms_opt(hour, 0, 0))
            .ok_or_else(invalid)?;

        Ok(Self {
            name: name.to_string(),
            hour,
        })
    }

    /// The partition that holds documents for the hour containing `at`.
    pub fn for_hour(prefix: &str, at: DateTime<Utc>) -> Self {
        let hour = at
            .naive_utc()
            .date()
            .and_hms_opt(at.hour(), 0, 0)
            .unwrap_or_else(|| at.naive_utc());
        let name = format!(
            "{}{:04}.{:02}.{:02}-{:02}",
            prefix,
            hour.year(),
            hour.month(),
            hour.day(),
            hour.hour()
        );
        Self { name, hour }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Start of the hour this partition covers (UTC).
    pub fn hour(&self) -> NaiveDateTime {
        self.hour
    }
}

impl Ord for PartitionId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl PartialOrd for PartitionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The newest partition considered safe to scan in this run.
///
/// Computed as `now - skew`, truncated to the hour. Partitions newer than the
/// horizon may still be receiving writes and are left for a later run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Horizon {
    last: PartitionId,
}

impl Horizon {
    /// Fails when `now - skew` falls outside the four-digit years a
    /// partition name can carry.
    pub fn new(prefix: &str, now: DateTime<Utc>, skew: Duration) -> Result<Self> {
        let at = now
            .checked_sub_signed(skew)
            .filter(|at| (0..=9999).contains(&at.year()))
            .ok_or_else(|| {
                SyncError::InvalidHorizon(format!("{} minus a skew of {}", now, skew))
            })?;
        Ok(Self {
            last: PartitionId::for_hour(prefix, at),
        })
    }

    /// True iff `partition` is at or before the horizon.
    pub fn is_safe(&self, partition: &PartitionId) -> bool {
        partition <= &self.last
    }

    pub fn last(&self) -> &PartitionId {
        &self.last
    }
}
