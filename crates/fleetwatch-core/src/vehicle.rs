//! Vehicle records and the coercions that keep them well-formed.
//!
//! Devices report loosely-typed JSON: coordinates may arrive as numbers or
//! numeric strings, flags may be missing. Everything read from the store is
//! funnelled through [`Vehicle::from_stored`], which guarantees numeric
//! coordinates (0 when absent or unparseable) and a defined `sos` flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result, time};

// ─── Record ──────────────────────────────────────────────────────────────────

/// The canonical vehicle record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
  pub id:                    String,
  pub latitude:              f64,
  pub longitude:             f64,
  pub last_update:           DateTime<Utc>,
  #[serde(default)]
  pub sos:                   bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sos_timestamp:         Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sos_cleared_timestamp: Option<DateTime<Utc>>,
  #[serde(default)]
  pub is_active:             bool,
  #[serde(default)]
  pub is_wifi_connected:     bool,
  #[serde(default)]
  pub is_cloud_connected:    bool,
  /// Fields written by other clients that this service does not interpret.
  /// Preserved verbatim across rewrites.
  #[serde(flatten)]
  pub extra:                 Map<String, Value>,
}

impl Vehicle {
  /// Normalise a raw stored value into a vehicle record.
  ///
  /// Non-object values (including `null`) yield an empty record with
  /// coordinates at the origin and every flag cleared.
  pub fn from_stored(id: &str, raw: Value) -> Self {
    let mut fields = match raw {
      Value::Object(map) => map,
      _ => Map::new(),
    };
    fields.remove("id");

    let latitude = take(&mut fields, "latitude").and_then(|v| coerce_f64(&v));
    let longitude = take(&mut fields, "longitude").and_then(|v| coerce_f64(&v));
    let last_update = take(&mut fields, "lastUpdate").and_then(|v| coerce_datetime(&v));
    let sos_timestamp = take(&mut fields, "sosTimestamp").and_then(|v| coerce_datetime(&v));
    let sos_cleared_timestamp =
      take(&mut fields, "sosClearedTimestamp").and_then(|v| coerce_datetime(&v));

    Vehicle {
      id: id.to_owned(),
      latitude: latitude.unwrap_or(0.0),
      longitude: longitude.unwrap_or(0.0),
      last_update: last_update.unwrap_or_else(time::now),
      sos: take_flag(&mut fields, "sos"),
      sos_timestamp,
      sos_cleared_timestamp,
      is_active: take_flag(&mut fields, "isActive"),
      is_wifi_connected: take_flag(&mut fields, "isWifiConnected"),
      is_cloud_connected: take_flag(&mut fields, "isCloudConnected"),
      extra: fields,
    }
  }

  /// Normalise every child of a raw `vehicles` subtree.
  pub fn collection_from_stored(
    raw: Option<Value>,
  ) -> std::collections::BTreeMap<String, Vehicle> {
    match raw {
      Some(Value::Object(children)) => children
        .into_iter()
        .map(|(id, value)| {
          let vehicle = Vehicle::from_stored(&id, value);
          (id, vehicle)
        })
        .collect(),
      _ => Default::default(),
    }
  }
}

// ─── Position ────────────────────────────────────────────────────────────────

/// A validated pair of coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
  pub latitude:  f64,
  pub longitude: f64,
}

impl Position {
  /// Build a position from loosely-typed JSON values, accepting numbers and
  /// numeric strings.
  pub fn from_json(latitude: &Value, longitude: &Value) -> Result<Self> {
    let latitude = coerce_f64(latitude)
      .ok_or_else(|| Error::Validation("latitude must be numeric".into()))?;
    let longitude = coerce_f64(longitude)
      .ok_or_else(|| Error::Validation("longitude must be numeric".into()))?;
    Ok(Self { latitude, longitude })
  }
}

// ─── Coercion helpers ────────────────────────────────────────────────────────

fn take(fields: &mut Map<String, Value>, key: &str) -> Option<Value> {
  fields.remove(key)
}

fn take_flag(fields: &mut Map<String, Value>, key: &str) -> bool {
  take(fields, key).is_some_and(|v| coerce_bool(&v))
}

/// Interpret a JSON value as a finite float.
pub fn coerce_f64(value: &Value) -> Option<f64> {
  let n = match value {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => s.trim().parse::<f64>().ok(),
    _ => None,
  }?;
  n.is_finite().then_some(n)
}

fn coerce_bool(value: &Value) -> bool {
  match value {
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
    Value::String(s) => s.eq_ignore_ascii_case("true"),
    _ => false,
  }
}

fn coerce_datetime(value: &Value) -> Option<DateTime<Utc>> {
  value
    .as_str()
    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn string_coordinates_are_parsed() {
    let v = Vehicle::from_stored("V1", json!({ "latitude": "35.5", "longitude": -80 }));
    assert_eq!(v.latitude, 35.5);
    assert_eq!(v.longitude, -80.0);
  }

  #[test]
  fn missing_or_garbage_fields_take_defaults() {
    let v = Vehicle::from_stored("V1", json!({ "latitude": "north", "sos": null }));
    assert_eq!(v.latitude, 0.0);
    assert_eq!(v.longitude, 0.0);
    assert!(!v.sos);
    assert!(!v.is_active);
    assert_eq!(v.id, "V1");
  }

  #[test]
  fn null_yields_empty_record() {
    let v = Vehicle::from_stored("V9", Value::Null);
    assert_eq!(v.id, "V9");
    assert!(v.extra.is_empty());
  }

  #[test]
  fn unknown_fields_survive_a_round_trip() {
    let v = Vehicle::from_stored(
      "V1",
      json!({ "latitude": 1.0, "longitude": 2.0, "battery": 87, "sos": true }),
    );
    assert!(v.sos);
    let stored = serde_json::to_value(&v).unwrap();
    assert_eq!(stored["battery"], json!(87));
    assert_eq!(Vehicle::from_stored("V1", stored), v);
  }

  #[test]
  fn collection_normalises_every_child() {
    let vehicles = Vehicle::collection_from_stored(Some(json!({
      "A": { "latitude": "1", "longitude": "2" },
      "B": { "sos": true },
    })));
    assert_eq!(vehicles.len(), 2);
    assert_eq!(vehicles["A"].latitude, 1.0);
    assert!(vehicles["B"].sos);
  }

  #[test]
  fn position_rejects_non_numeric_input() {
    assert!(Position::from_json(&json!("35.0"), &json!(-80.0)).is_ok());
    assert!(matches!(
      Position::from_json(&json!(true), &json!(1)),
      Err(Error::Validation(_))
    ));
    assert!(matches!(
      Position::from_json(&json!(1), &json!("NaN")),
      Err(Error::Validation(_))
    ));
  }
}
