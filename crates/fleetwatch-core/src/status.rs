//! The system-wide operational status singleton.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, VariantNames};

/// The fixed set of operational states.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  VariantNames,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StatusLevel {
  #[default]
  Operational,
  Degraded,
  Maintenance,
  Outage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
  #[serde(default)]
  pub status:       StatusLevel,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_updated: Option<DateTime<Utc>>,
}
