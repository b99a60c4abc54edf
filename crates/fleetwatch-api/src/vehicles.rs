//! Handlers for `/vehicles` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/vehicles` | Map of id → vehicle |
//! | `GET`  | `/vehicles/:id` | 404 if absent |
//! | `POST` | `/vehicles/:id/location` | Body: `{"latitude","longitude"}` |
//! | `POST` | `/vehicles/:id/sos` | |
//! | `POST` | `/vehicles/:id/clear-sos` | |

use std::collections::BTreeMap;

use axum::{
  Json,
  extract::{Path, State},
};
use fleetwatch_core::{
  log::events,
  store::StateStore,
  vehicle::{Position, Vehicle},
};
use serde::Deserialize;
use serde_json::Value;

use crate::{
  Ack, ApiState, auth::Authenticated, error::ApiError, extract::ApiJson, logs::audit,
};

/// `GET /vehicles`
pub async fn list<S>(
  State(state): State<ApiState<S>>,
  Authenticated(principal): Authenticated,
) -> Result<Json<BTreeMap<String, Vehicle>>, ApiError>
where
  S: StateStore + 'static,
{
  let vehicles = state.fleet.get_vehicles(&principal.session()).await?;
  Ok(Json(vehicles))
}

/// `GET /vehicles/:id`
pub async fn get_one<S>(
  State(state): State<ApiState<S>>,
  Authenticated(principal): Authenticated,
  Path(id): Path<String>,
) -> Result<Json<Vehicle>, ApiError>
where
  S: StateStore + 'static,
{
  let vehicle = state
    .fleet
    .get_vehicle(&principal.session(), &id)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("vehicle {id} not found")))?;
  Ok(Json(vehicle))
}

// ─── Location ────────────────────────────────────────────────────────────────

/// Coordinates may be numbers or numeric strings. `null` counts as missing.
#[derive(Debug, Deserialize)]
pub struct LocationBody {
  pub latitude:  Option<Value>,
  pub longitude: Option<Value>,
}

/// `POST /vehicles/:id/location`
pub async fn update_location<S>(
  State(state): State<ApiState<S>>,
  Authenticated(principal): Authenticated,
  Path(id): Path<String>,
  ApiJson(body): ApiJson<LocationBody>,
) -> Result<Json<Ack>, ApiError>
where
  S: StateStore + 'static,
{
  let (Some(latitude), Some(longitude)) = (body.latitude, body.longitude) else {
    return Err(ApiError::BadRequest(
      "latitude and longitude are required".into(),
    ));
  };
  let position = Position::from_json(&latitude, &longitude)?;

  let session = principal.session();
  let vehicle = state
    .fleet
    .update_vehicle_location(&session, &id, position)
    .await?;
  audit(
    &state.fleet,
    &session,
    &vehicle.id,
    events::LOCATION_UPDATED,
    format!("Location updated to {}, {}", vehicle.latitude, vehicle.longitude),
  )
  .await;
  Ok(Json(Ack::ok()))
}

// ─── SOS ─────────────────────────────────────────────────────────────────────

/// `POST /vehicles/:id/sos`
pub async fn trigger_sos<S>(
  State(state): State<ApiState<S>>,
  Authenticated(principal): Authenticated,
  Path(id): Path<String>,
) -> Result<Json<Ack>, ApiError>
where
  S: StateStore + 'static,
{
  let session = principal.session();
  let record = state.fleet.trigger_sos(&session, &id).await?;
  audit(
    &state.fleet,
    &session,
    &record.vehicle_id,
    events::SOS_TRIGGERED,
    "Emergency alert activated",
  )
  .await;
  Ok(Json(Ack::ok()))
}

/// `POST /vehicles/:id/clear-sos`
pub async fn clear_sos<S>(
  State(state): State<ApiState<S>>,
  Authenticated(principal): Authenticated,
  Path(id): Path<String>,
) -> Result<Json<Ack>, ApiError>
where
  S: StateStore + 'static,
{
  let session = principal.session();
  let vehicle = state.fleet.clear_sos(&session, &id).await?;
  audit(
    &state.fleet,
    &session,
    &vehicle.id,
    events::SOS_CLEARED,
    "Emergency alert cleared",
  )
  .await;
  Ok(Json(Ack::ok()))
}
