//! SOS records, one per vehicle with an active alert.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Written alongside the vehicle's `sos` flag when an alert is raised and
/// removed when it is cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SosRecord {
  pub vehicle_id: String,
  pub latitude:   f64,
  pub longitude:  f64,
  pub timestamp:  DateTime<Utc>,
  pub active:     bool,
}
