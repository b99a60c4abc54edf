//! Emergency contacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored emergency contact. Fields are defaulted on read because updates
/// are partial merges and older documents may lack some of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyContact {
  #[serde(default)]
  pub name:         String,
  #[serde(default)]
  pub number:       String,
  #[serde(default, rename = "type")]
  pub kind:         String,
  #[serde(default)]
  pub last_updated: Option<DateTime<Utc>>,
}

/// A partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactUpdate {
  pub name:   Option<String>,
  pub number: Option<String>,
  #[serde(rename = "type")]
  pub kind:   Option<String>,
}

impl ContactUpdate {
  pub(crate) fn into_fields(self) -> Map<String, Value> {
    let mut fields = Map::new();
    if let Some(name) = self.name {
      fields.insert("name".into(), Value::String(name));
    }
    if let Some(number) = self.number {
      fields.insert("number".into(), Value::String(number));
    }
    if let Some(kind) = self.kind {
      fields.insert("type".into(), Value::String(kind));
    }
    fields
  }
}
