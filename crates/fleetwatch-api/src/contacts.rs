//! Handlers for `/emergency-contacts` endpoints. Writes are admin-only.

use std::collections::BTreeMap;

use axum::{
  Json,
  extract::{Path, State},
};
use fleetwatch_core::{
  contact::{ContactUpdate, EmergencyContact},
  log::{SYSTEM_SOURCE, events},
  store::StateStore,
};
use serde::Deserialize;

use crate::{
  Ack, ApiState,
  auth::{Admin, Authenticated},
  error::ApiError,
  extract::ApiJson,
  logs::audit,
  present,
};

#[derive(Debug, Deserialize)]
pub struct ContactBody {
  pub name:   Option<String>,
  pub number: Option<String>,
  #[serde(rename = "type")]
  pub kind:   Option<String>,
}

impl ContactBody {
  /// All three fields are required on every write.
  fn into_update(self) -> Result<ContactUpdate, ApiError> {
    match (present(self.name), present(self.number), present(self.kind)) {
      (Some(name), Some(number), Some(kind)) => Ok(ContactUpdate {
        name:   Some(name),
        number: Some(number),
        kind:   Some(kind),
      }),
      _ => Err(ApiError::BadRequest(
        "name, number, and type are required".into(),
      )),
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct CreateContactBody {
  pub id:      Option<String>,
  #[serde(flatten)]
  pub contact: ContactBody,
}

/// `GET /emergency-contacts`
pub async fn list<S>(
  State(state): State<ApiState<S>>,
  Authenticated(principal): Authenticated,
) -> Result<Json<BTreeMap<String, EmergencyContact>>, ApiError>
where
  S: StateStore + 'static,
{
  let contacts = state
    .fleet
    .get_emergency_contacts(&principal.session())
    .await?;
  Ok(Json(contacts))
}

/// `POST /emergency-contacts`
pub async fn create<S>(
  State(state): State<ApiState<S>>,
  Admin(admin): Admin,
  ApiJson(body): ApiJson<CreateContactBody>,
) -> Result<Json<Ack>, ApiError>
where
  S: StateStore + 'static,
{
  let Some(id) = present(body.id) else {
    return Err(ApiError::BadRequest(
      "id, name, number, and type are required".into(),
    ));
  };
  let update = body.contact.into_update()?;

  let session = admin.session();
  state
    .fleet
    .update_emergency_contact(&session, &id, update)
    .await?;
  audit(
    &state.fleet,
    &session,
    SYSTEM_SOURCE,
    events::CONTACT_ADDED,
    format!("New emergency contact added: {id}"),
  )
  .await;
  Ok(Json(Ack::ok()))
}

/// `PUT /emergency-contacts/:id`
pub async fn update<S>(
  State(state): State<ApiState<S>>,
  Admin(admin): Admin,
  Path(id): Path<String>,
  ApiJson(body): ApiJson<ContactBody>,
) -> Result<Json<Ack>, ApiError>
where
  S: StateStore + 'static,
{
  let update = body.into_update()?;

  let session = admin.session();
  state
    .fleet
    .update_emergency_contact(&session, &id, update)
    .await?;
  audit(
    &state.fleet,
    &session,
    SYSTEM_SOURCE,
    events::CONTACT_UPDATED,
    format!("Emergency contact updated: {id}"),
  )
  .await;
  Ok(Json(Ack::ok()))
}

/// `DELETE /emergency-contacts/:id`
pub async fn delete<S>(
  State(state): State<ApiState<S>>,
  Admin(admin): Admin,
  Path(id): Path<String>,
) -> Result<Json<Ack>, ApiError>
where
  S: StateStore + 'static,
{
  let session = admin.session();
  state.fleet.delete_emergency_contact(&session, &id).await?;
  audit(
    &state.fleet,
    &session,
    SYSTEM_SOURCE,
    events::CONTACT_DELETED,
    format!("Emergency contact deleted: {id}"),
  )
  .await;
  Ok(Json(Ack::ok()))
}
