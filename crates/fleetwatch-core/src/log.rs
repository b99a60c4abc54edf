//! Append-only activity log.
//!
//! Entries are keyed by their creation timestamp, sanitised into a valid
//! store key. Two entries created within the same millisecond share a key
//! and the later one overwrites the earlier.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::time::iso_millis;

/// The vehicle identifier used for entries that do not concern a vehicle.
pub const SYSTEM_SOURCE: &str = "SYSTEM";

/// Event tags written by this service.
pub mod events {
  pub const SOS_TRIGGERED: &str = "SOS_TRIGGERED";
  pub const SOS_CLEARED: &str = "SOS_CLEARED";
  pub const LOCATION_UPDATED: &str = "LOCATION_UPDATED";
  pub const USER_LOGIN: &str = "USER_LOGIN";
  pub const USER_LOGOUT: &str = "USER_LOGOUT";
  pub const PASSWORD_CHANGED: &str = "PASSWORD_CHANGED";
  pub const PASSWORD_RESET_REQUESTED: &str = "PASSWORD_RESET_REQUESTED";
  pub const USER_UPDATED: &str = "USER_UPDATED";
  pub const CONTACT_ADDED: &str = "CONTACT_ADDED";
  pub const CONTACT_UPDATED: &str = "CONTACT_UPDATED";
  pub const CONTACT_DELETED: &str = "CONTACT_DELETED";
  pub const STATUS_UPDATED: &str = "STATUS_UPDATED";
  pub const ISSUE_REPORTED: &str = "ISSUE_REPORTED";
  pub const LOGS_CLEANED: &str = "LOGS_CLEANED";
}

/// Derive the store key for an entry created at `timestamp`.
///
/// `2025-03-01T12:30:45.123Z` becomes `2025-03-01T12-30-45_123Z`.
pub fn log_key(timestamp: DateTime<Utc>) -> String {
  iso_millis(timestamp)
    .replace(':', "-")
    .replace(['.', '[', ']', '#', '$'], "_")
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// The stored body of a log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
  pub vehicle_id: String,
  pub event:      String,
  #[serde(default)]
  pub details:    String,
  pub timestamp:  DateTime<Utc>,
}

/// A log record together with its store key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
  pub id:     String,
  #[serde(flatten)]
  pub record: LogRecord,
}

/// Decode every well-formed entry in a raw `logs` subtree, newest first.
pub(crate) fn entries_from_stored(raw: Option<Value>) -> Vec<LogEntry> {
  let Some(Value::Object(children)) = raw else {
    return Vec::new();
  };

  let mut entries: Vec<LogEntry> = children
    .into_iter()
    .filter_map(|(id, value)| match serde_json::from_value::<LogRecord>(value) {
      Ok(record) => Some(LogEntry { id, record }),
      Err(e) => {
        tracing::warn!(key = %id, error = %e, "skipping malformed log entry");
        None
      }
    })
    .collect();

  entries.sort_by(|a, b| {
    b.record
      .timestamp
      .cmp(&a.record.timestamp)
      .then_with(|| b.id.cmp(&a.id))
  });
  entries
}

// ─── Queries ─────────────────────────────────────────────────────────────────

/// Filters applied in memory to the full log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
  /// Matches entries whose event tag *or* vehicle identifier equals this
  /// value, so `SYSTEM` selects service-originated entries.
  pub kind:       Option<String>,
  pub vehicle_id: Option<String>,
  /// Inclusive lower bound on the entry timestamp.
  pub start:      Option<DateTime<Utc>>,
  /// Inclusive upper bound on the entry timestamp.
  pub end:        Option<DateTime<Utc>>,
}

impl LogFilter {
  pub fn matches(&self, record: &LogRecord) -> bool {
    if let Some(kind) = &self.kind
      && record.event != *kind
      && record.vehicle_id != *kind
    {
      return false;
    }
    if let Some(vehicle_id) = &self.vehicle_id
      && record.vehicle_id != *vehicle_id
    {
      return false;
    }
    if self.start.is_some_and(|start| record.timestamp < start) {
      return false;
    }
    if self.end.is_some_and(|end| record.timestamp > end) {
      return false;
    }
    true
  }
}

/// Parameters for [`Fleet::get_logs`](crate::fleet::Fleet::get_logs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
  pub limit:  usize,
  pub offset: usize,
  pub filter: LogFilter,
}

impl LogQuery {
  pub const DEFAULT_LIMIT: usize = 100;

  pub fn latest(limit: usize) -> Self {
    Self {
      limit,
      ..Self::default()
    }
  }
}

impl Default for LogQuery {
  fn default() -> Self {
    Self {
      limit:  Self::DEFAULT_LIMIT,
      offset: 0,
      filter: LogFilter::default(),
    }
  }
}

// ─── Statistics ──────────────────────────────────────────────────────────────

/// Aggregate counts over a time range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStats {
  pub start_date: DateTime<Utc>,
  pub end_date:   DateTime<Utc>,
  pub total:      usize,
  pub by_event:   BTreeMap<String, usize>,
  pub by_vehicle: BTreeMap<String, usize>,
}

impl LogStats {
  pub fn collect<'a>(
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    records: impl IntoIterator<Item = &'a LogRecord>,
  ) -> Self {
    let filter = LogFilter {
      start: Some(start_date),
      end: Some(end_date),
      ..LogFilter::default()
    };
    let mut stats = Self {
      start_date,
      end_date,
      total: 0,
      by_event: BTreeMap::new(),
      by_vehicle: BTreeMap::new(),
    };
    for record in records.into_iter().filter(|r| filter.matches(r)) {
      stats.total += 1;
      *stats.by_event.entry(record.event.clone()).or_default() += 1;
      *stats.by_vehicle.entry(record.vehicle_id.clone()).or_default() += 1;
    }
    stats
  }
}
