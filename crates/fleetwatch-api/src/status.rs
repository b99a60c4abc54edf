//! Handlers for `/system-status` endpoints.

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use fleetwatch_core::{
  log::{LogEntry, LogQuery, SYSTEM_SOURCE, events},
  status::{StatusLevel, SystemStatus},
  store::StateStore,
  time,
};
use serde::{Deserialize, Serialize};
use strum::VariantNames as _;

use crate::{
  Ack, ApiState,
  auth::{Admin, Authenticated},
  error::ApiError,
  extract::ApiJson,
  logs::audit,
  present,
};

/// Issues of this type also degrade the system status.
const CRITICAL_ISSUE: &str = "critical";

/// Number of log entries included in the health report.
const RECENT_LOGS: usize = 10;

/// `GET /system-status`
pub async fn get<S>(
  State(state): State<ApiState<S>>,
  Authenticated(principal): Authenticated,
) -> Result<Json<SystemStatus>, ApiError>
where
  S: StateStore + 'static,
{
  let status = state
    .fleet
    .get_system_status(&principal.session())
    .await?;
  Ok(Json(status))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusBody {
  pub status: Option<String>,
}

/// `PUT /system-status`
pub async fn update<S>(
  State(state): State<ApiState<S>>,
  Admin(admin): Admin,
  ApiJson(body): ApiJson<UpdateStatusBody>,
) -> Result<Json<Ack>, ApiError>
where
  S: StateStore + 'static,
{
  let Some(raw) = present(body.status) else {
    return Err(ApiError::BadRequest("status is required".into()));
  };
  let status: StatusLevel = raw.parse().map_err(|_| {
    ApiError::BadRequest(format!(
      "invalid status, must be one of: {}",
      StatusLevel::VARIANTS.join(", ")
    ))
  })?;

  let session = admin.session();
  state.fleet.update_system_status(&session, status).await?;
  audit(
    &state.fleet,
    &session,
    SYSTEM_SOURCE,
    events::STATUS_UPDATED,
    format!("System status updated to: {status}"),
  )
  .await;
  Ok(Json(Ack::ok()))
}

// ─── Health ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthMetrics {
  pub vehicle_count:    usize,
  pub active_sos_count: usize,
  pub recent_logs:      Vec<LogEntry>,
  pub last_updated:     DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
  pub status:  StatusLevel,
  pub metrics: HealthMetrics,
}

/// `GET /system-status/health`
pub async fn health<S>(
  State(state): State<ApiState<S>>,
  Authenticated(principal): Authenticated,
) -> Result<Json<HealthReport>, ApiError>
where
  S: StateStore + 'static,
{
  let session = principal.session();
  let recent = LogQuery::latest(RECENT_LOGS);
  let (status, vehicle_count, active_sos_count, recent_logs) = tokio::try_join!(
    state.fleet.get_system_status(&session),
    state.fleet.get_vehicle_count(&session),
    state.fleet.get_active_sos_count(&session),
    state.fleet.get_logs(&session, &recent),
  )?;

  Ok(Json(HealthReport {
    status:  status.status,
    metrics: HealthMetrics {
      vehicle_count,
      active_sos_count,
      recent_logs,
      last_updated: time::now(),
    },
  }))
}

// ─── Issues ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct IssueBody {
  #[serde(rename = "type")]
  pub kind:        Option<String>,
  pub description: Option<String>,
}

/// `POST /system-status/issues`
///
/// The log entry is the record of the issue, so unlike audit entries a
/// failure to write it fails the request.
pub async fn report_issue<S>(
  State(state): State<ApiState<S>>,
  Admin(admin): Admin,
  ApiJson(body): ApiJson<IssueBody>,
) -> Result<Json<Ack>, ApiError>
where
  S: StateStore + 'static,
{
  let (Some(kind), Some(description)) = (present(body.kind), present(body.description)) else {
    return Err(ApiError::BadRequest("type and description are required".into()));
  };

  let session = admin.session();
  state
    .fleet
    .add_log(
      &session,
      SYSTEM_SOURCE,
      events::ISSUE_REPORTED,
      &format!("System issue reported - Type: {kind}, Description: {description}"),
    )
    .await?;

  if kind == CRITICAL_ISSUE {
    state
      .fleet
      .update_system_status(&session, StatusLevel::Degraded)
      .await?;
    tracing::warn!(%description, "critical issue reported, status degraded");
  }

  Ok(Json(Ack::ok()))
}
