//! [`Fleet`]: typed operations over a [`StateStore`].
//!
//! Every operation takes the caller's [`Session`] explicitly. Records live
//! at these paths:
//!
//! | Path | Contents |
//! |------|----------|
//! | `vehicles/<id>` | [`Vehicle`] |
//! | `sos/<id>` | [`SosRecord`] |
//! | `logs/<key>` | [`LogRecord`] |
//! | `emergency-contacts/<id>` | [`EmergencyContact`] |
//! | `system-status` | [`SystemStatus`] |

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::{
  Error, Result,
  contact::{ContactUpdate, EmergencyContact},
  log::{LogEntry, LogQuery, LogRecord, LogStats, entries_from_stored, log_key},
  session::Session,
  sos::SosRecord,
  status::{StatusLevel, SystemStatus},
  store::{StateStore, WriteOp, child_key, child_path},
  time,
  vehicle::{Position, Vehicle},
};

pub const VEHICLES: &str = "vehicles";
pub const SOS: &str = "sos";
pub const LOGS: &str = "logs";
pub const EMERGENCY_CONTACTS: &str = "emergency-contacts";
pub const SYSTEM_STATUS: &str = "system-status";

/// The data access layer.
///
/// Cloning is cheap; the store is reference-counted.
pub struct Fleet<S> {
  store: Arc<S>,
}

impl<S> Clone for Fleet<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
    }
  }
}

impl<S: StateStore> Fleet<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  pub fn store(&self) -> &Arc<S> { &self.store }

  async fn read(&self, path: &str) -> Result<Option<Value>> {
    self.store.get(path).await.map_err(Error::store)
  }

  async fn apply(&self, batch: Vec<WriteOp>) -> Result<()> {
    self.store.apply(batch).await.map_err(Error::store)
  }

  // ── Vehicles ──────────────────────────────────────────────────────────

  /// Fetch one vehicle. Absence is `Ok(None)`, never an error.
  pub async fn get_vehicle(&self, session: &Session, id: &str) -> Result<Option<Vehicle>> {
    let id = child_key(id)?;
    let path = child_path(VEHICLES, id)?;
    tracing::debug!(actor = session.actor(), vehicle_id = id, "get vehicle");
    Ok(self.read(&path).await?.map(|raw| Vehicle::from_stored(id, raw)))
  }

  /// Fetch every vehicle, normalised.
  pub async fn get_vehicles(&self, session: &Session) -> Result<BTreeMap<String, Vehicle>> {
    tracing::debug!(actor = session.actor(), "get vehicles");
    Ok(Vehicle::collection_from_stored(self.read(VEHICLES).await?))
  }

  pub async fn get_vehicle_count(&self, session: &Session) -> Result<usize> {
    Ok(self.get_vehicles(session).await?.len())
  }

  /// Record a new position for `id`, creating the vehicle if needed.
  ///
  /// The whole record is rewritten (last writer wins). Concurrent updates to
  /// the same vehicle can interleave their read and write and lose one of
  /// the updates.
  pub async fn update_vehicle_location(
    &self,
    session: &Session,
    id: &str,
    position: Position,
  ) -> Result<Vehicle> {
    let id = child_key(id)?;
    let path = child_path(VEHICLES, id)?;
    let existing = self.read(&path).await?.unwrap_or(Value::Null);

    let mut vehicle = Vehicle::from_stored(id, existing);
    vehicle.latitude = position.latitude;
    vehicle.longitude = position.longitude;
    vehicle.last_update = time::now();
    vehicle.is_active = true;
    vehicle.is_wifi_connected = true;
    vehicle.is_cloud_connected = true;

    self
      .apply(vec![WriteOp::Set {
        path,
        value: serde_json::to_value(&vehicle)?,
      }])
      .await?;

    tracing::info!(
      actor = session.actor(),
      vehicle_id = id,
      latitude = position.latitude,
      longitude = position.longitude,
      "vehicle location updated"
    );
    Ok(vehicle)
  }

  // ── SOS ───────────────────────────────────────────────────────────────

  /// Raise an alert: flag the vehicle and write its SOS record in one
  /// atomic batch.
  pub async fn trigger_sos(&self, session: &Session, id: &str) -> Result<SosRecord> {
    let id = child_key(id)?;
    let vehicle_path = child_path(VEHICLES, id)?;
    let sos_path = child_path(SOS, id)?;
    let existing = self.read(&vehicle_path).await?.unwrap_or(Value::Null);

    let now = time::now();
    let mut vehicle = Vehicle::from_stored(id, existing);
    vehicle.sos = true;
    vehicle.sos_timestamp = Some(now);
    vehicle.is_active = true;

    let record = SosRecord {
      vehicle_id: id.to_owned(),
      latitude:   vehicle.latitude,
      longitude:  vehicle.longitude,
      timestamp:  now,
      active:     true,
    };

    self
      .apply(vec![
        WriteOp::Set {
          path:  vehicle_path,
          value: serde_json::to_value(&vehicle)?,
        },
        WriteOp::Set {
          path:  sos_path,
          value: serde_json::to_value(&record)?,
        },
      ])
      .await?;

    tracing::info!(actor = session.actor(), vehicle_id = id, "SOS triggered");
    Ok(record)
  }

  /// Clear an alert: unflag the vehicle and delete its SOS record in one
  /// atomic batch.
  pub async fn clear_sos(&self, session: &Session, id: &str) -> Result<Vehicle> {
    let id = child_key(id)?;
    let vehicle_path = child_path(VEHICLES, id)?;
    let sos_path = child_path(SOS, id)?;
    let existing = self.read(&vehicle_path).await?.unwrap_or(Value::Null);

    let mut vehicle = Vehicle::from_stored(id, existing);
    vehicle.sos = false;
    vehicle.sos_cleared_timestamp = Some(time::now());

    self
      .apply(vec![
        WriteOp::Set {
          path:  vehicle_path,
          value: serde_json::to_value(&vehicle)?,
        },
        WriteOp::Remove { path: sos_path },
      ])
      .await?;

    tracing::info!(actor = session.actor(), vehicle_id = id, "SOS cleared");
    Ok(vehicle)
  }

  pub async fn get_sos_record(&self, session: &Session, id: &str) -> Result<Option<SosRecord>> {
    let id = child_key(id)?;
    let path = child_path(SOS, id)?;
    tracing::debug!(actor = session.actor(), vehicle_id = id, "get SOS record");
    self
      .read(&path)
      .await?
      .map(|raw| serde_json::from_value(raw).map_err(Error::from))
      .transpose()
  }

  /// Number of SOS records with `active = true`.
  pub async fn get_active_sos_count(&self, session: &Session) -> Result<usize> {
    tracing::debug!(actor = session.actor(), "count active SOS records");
    let count = match self.read(SOS).await? {
      Some(Value::Object(records)) => records
        .values()
        .filter(|r| r.get("active").and_then(Value::as_bool).unwrap_or(false))
        .count(),
      _ => 0,
    };
    Ok(count)
  }

  // ── Logs ──────────────────────────────────────────────────────────────

  /// Append a log entry keyed by the current millisecond.
  pub async fn add_log(
    &self,
    session: &Session,
    vehicle_id: &str,
    event: &str,
    details: &str,
  ) -> Result<LogEntry> {
    let timestamp = time::now();
    let id = log_key(timestamp);
    let record = LogRecord {
      vehicle_id: vehicle_id.to_owned(),
      event: event.to_owned(),
      details: details.to_owned(),
      timestamp,
    };

    self
      .apply(vec![WriteOp::Set {
        path:  child_path(LOGS, &id)?,
        value: serde_json::to_value(&record)?,
      }])
      .await?;

    tracing::debug!(actor = session.actor(), vehicle_id, event, key = %id, "log entry added");
    Ok(LogEntry { id, record })
  }

  /// Filtered, newest-first page of the log.
  ///
  /// Reads and filters the entire log on every call.
  pub async fn get_logs(&self, session: &Session, query: &LogQuery) -> Result<Vec<LogEntry>> {
    tracing::debug!(actor = session.actor(), ?query, "get logs");
    let entries = entries_from_stored(self.read(LOGS).await?);
    Ok(
      entries
        .into_iter()
        .filter(|e| query.filter.matches(&e.record))
        .skip(query.offset)
        .take(query.limit)
        .collect(),
    )
  }

  pub async fn get_log_stats(
    &self,
    session: &Session,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
  ) -> Result<LogStats> {
    tracing::debug!(actor = session.actor(), %start_date, %end_date, "get log stats");
    let entries = entries_from_stored(self.read(LOGS).await?);
    Ok(LogStats::collect(
      start_date,
      end_date,
      entries.iter().map(|e| &e.record),
    ))
  }

  /// Delete every entry strictly older than `cutoff`. Returns the number of
  /// entries removed.
  pub async fn clear_old_logs(&self, session: &Session, cutoff: DateTime<Utc>) -> Result<usize> {
    let entries = entries_from_stored(self.read(LOGS).await?);
    let batch = entries
      .into_iter()
      .filter(|e| e.record.timestamp < cutoff)
      .map(|e| child_path(LOGS, &e.id).map(|path| WriteOp::Remove { path }))
      .collect::<Result<Vec<_>>>()?;

    let count = batch.len();
    if count > 0 {
      self.apply(batch).await?;
    }
    tracing::info!(actor = session.actor(), %cutoff, count, "old log entries removed");
    Ok(count)
  }

  // ── Emergency contacts ────────────────────────────────────────────────

  pub async fn get_emergency_contacts(
    &self,
    session: &Session,
  ) -> Result<BTreeMap<String, EmergencyContact>> {
    tracing::debug!(actor = session.actor(), "get emergency contacts");
    let Some(Value::Object(children)) = self.read(EMERGENCY_CONTACTS).await? else {
      return Ok(BTreeMap::new());
    };
    Ok(
      children
        .into_iter()
        .filter_map(|(id, raw)| match serde_json::from_value(raw) {
          Ok(contact) => Some((id, contact)),
          Err(e) => {
            tracing::warn!(contact_id = %id, error = %e, "skipping malformed emergency contact");
            None
          }
        })
        .collect(),
    )
  }

  /// Create or partially update a contact, stamping `lastUpdated`.
  pub async fn update_emergency_contact(
    &self,
    session: &Session,
    id: &str,
    update: ContactUpdate,
  ) -> Result<()> {
    let id = child_key(id)?;
    let path = child_path(EMERGENCY_CONTACTS, id)?;
    let mut fields = update.into_fields();
    fields.insert(
      "lastUpdated".into(),
      Value::String(time::iso_millis(time::now())),
    );
    self.apply(vec![WriteOp::Merge { path, fields }]).await?;
    tracing::info!(actor = session.actor(), contact_id = id, "emergency contact updated");
    Ok(())
  }

  pub async fn delete_emergency_contact(&self, session: &Session, id: &str) -> Result<()> {
    let id = child_key(id)?;
    let path = child_path(EMERGENCY_CONTACTS, id)?;
    self.apply(vec![WriteOp::Remove { path }]).await?;
    tracing::info!(actor = session.actor(), contact_id = id, "emergency contact deleted");
    Ok(())
  }

  // ── System status ─────────────────────────────────────────────────────

  /// Read the status singleton; an unset status reads as operational.
  pub async fn get_system_status(&self, session: &Session) -> Result<SystemStatus> {
    tracing::debug!(actor = session.actor(), "get system status");
    match self.read(SYSTEM_STATUS).await? {
      Some(raw) => Ok(serde_json::from_value(raw)?),
      None => Ok(SystemStatus::default()),
    }
  }

  pub async fn update_system_status(&self, session: &Session, status: StatusLevel) -> Result<()> {
    let mut fields = Map::new();
    fields.insert("status".into(), Value::String(status.to_string()));
    fields.insert(
      "lastUpdated".into(),
      Value::String(time::iso_millis(time::now())),
    );
    self
      .apply(vec![WriteOp::Merge {
        path: SYSTEM_STATUS.to_owned(),
        fields,
      }])
      .await?;
    tracing::info!(actor = session.actor(), %status, "system status updated");
    Ok(())
  }
}
