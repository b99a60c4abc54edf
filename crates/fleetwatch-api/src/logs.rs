//! Handlers for `/logs` endpoints, plus the audit helper the other handlers
//! use to record mutations.

use axum::{
  Json,
  extract::{Path, State},
};
use fleetwatch_core::{
  Fleet, Session,
  log::{LogEntry, LogFilter, LogQuery, LogStats, SYSTEM_SOURCE, events},
  store::StateStore,
  time::{iso_millis, parse_bound},
};
use serde::{Deserialize, Serialize};

use crate::{
  Ack, ApiState,
  auth::{Admin, Authenticated},
  error::ApiError,
  extract::{ApiJson, ApiQuery},
  present,
};

/// Append an audit entry. Failures are logged and otherwise ignored: the
/// mutation being audited has already succeeded.
pub(crate) async fn audit<S: StateStore>(
  fleet: &Fleet<S>,
  session: &Session,
  vehicle_id: &str,
  event: &str,
  details: impl AsRef<str>,
) {
  if let Err(e) = fleet
    .add_log(session, vehicle_id, event, details.as_ref())
    .await
  {
    tracing::warn!(error = %e, event, vehicle_id, "failed to write audit log entry");
  }
}

// ─── Queries ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
  pub limit:      Option<usize>,
  pub offset:     Option<usize>,
  #[serde(rename = "type")]
  pub kind:       Option<String>,
  pub vehicle_id: Option<String>,
  pub start_date: Option<String>,
  pub end_date:   Option<String>,
}

impl ListParams {
  fn into_query(self) -> Result<LogQuery, ApiError> {
    let start = present(self.start_date)
      .map(|s| parse_bound(&s, false))
      .transpose()?;
    let end = present(self.end_date)
      .map(|s| parse_bound(&s, true))
      .transpose()?;
    Ok(LogQuery {
      limit:  self.limit.unwrap_or(LogQuery::DEFAULT_LIMIT),
      offset: self.offset.unwrap_or(0),
      filter: LogFilter {
        kind: present(self.kind),
        vehicle_id: present(self.vehicle_id),
        start,
        end,
      },
    })
  }
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitParams {
  pub limit: Option<usize>,
}

/// `GET /logs`
pub async fn list<S>(
  State(state): State<ApiState<S>>,
  Authenticated(principal): Authenticated,
  ApiQuery(params): ApiQuery<ListParams>,
) -> Result<Json<Vec<LogEntry>>, ApiError>
where
  S: StateStore + 'static,
{
  let query = params.into_query()?;
  let logs = state.fleet.get_logs(&principal.session(), &query).await?;
  Ok(Json(logs))
}

/// `GET /logs/vehicle/:id`
pub async fn by_vehicle<S>(
  State(state): State<ApiState<S>>,
  Authenticated(principal): Authenticated,
  Path(id): Path<String>,
  ApiQuery(params): ApiQuery<LimitParams>,
) -> Result<Json<Vec<LogEntry>>, ApiError>
where
  S: StateStore + 'static,
{
  let query = LogQuery {
    limit: params.limit.unwrap_or(LogQuery::DEFAULT_LIMIT),
    filter: LogFilter {
      vehicle_id: Some(id.trim().to_owned()),
      ..LogFilter::default()
    },
    ..LogQuery::default()
  };
  let logs = state.fleet.get_logs(&principal.session(), &query).await?;
  Ok(Json(logs))
}

/// `GET /logs/system`
pub async fn system<S>(
  State(state): State<ApiState<S>>,
  Admin(admin): Admin,
  ApiQuery(params): ApiQuery<LimitParams>,
) -> Result<Json<Vec<LogEntry>>, ApiError>
where
  S: StateStore + 'static,
{
  let query = LogQuery {
    limit: params.limit.unwrap_or(LogQuery::DEFAULT_LIMIT),
    filter: LogFilter {
      kind: Some(SYSTEM_SOURCE.to_owned()),
      ..LogFilter::default()
    },
    ..LogQuery::default()
  };
  let logs = state.fleet.get_logs(&admin.session(), &query).await?;
  Ok(Json(logs))
}

// ─── Writes ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLogBody {
  pub vehicle_id: Option<String>,
  pub event:      Option<String>,
  pub details:    Option<String>,
}

/// `POST /logs`
pub async fn create<S>(
  State(state): State<ApiState<S>>,
  Authenticated(principal): Authenticated,
  ApiJson(body): ApiJson<CreateLogBody>,
) -> Result<Json<Ack>, ApiError>
where
  S: StateStore + 'static,
{
  let (Some(vehicle_id), Some(event)) = (present(body.vehicle_id), present(body.event)) else {
    return Err(ApiError::BadRequest("vehicleId and event are required".into()));
  };
  state
    .fleet
    .add_log(
      &principal.session(),
      &vehicle_id,
      &event,
      body.details.as_deref().unwrap_or_default(),
    )
    .await?;
  Ok(Json(Ack::ok()))
}

// ─── Admin ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsParams {
  pub start_date: Option<String>,
  pub end_date:   Option<String>,
}

/// `GET /logs/stats`
pub async fn stats<S>(
  State(state): State<ApiState<S>>,
  Admin(admin): Admin,
  ApiQuery(params): ApiQuery<StatsParams>,
) -> Result<Json<LogStats>, ApiError>
where
  S: StateStore + 'static,
{
  let (Some(start), Some(end)) = (present(params.start_date), present(params.end_date)) else {
    return Err(ApiError::BadRequest("startDate and endDate are required".into()));
  };
  let start = parse_bound(&start, false)?;
  let end = parse_bound(&end, true)?;
  if start > end {
    return Err(ApiError::BadRequest("startDate must not be after endDate".into()));
  }

  let stats = state
    .fleet
    .get_log_stats(&admin.session(), start, end)
    .await?;
  Ok(Json(stats))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupParams {
  pub older_than: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
  pub success:       bool,
  pub deleted_count: usize,
}

/// `DELETE /logs/cleanup`
pub async fn cleanup<S>(
  State(state): State<ApiState<S>>,
  Admin(admin): Admin,
  ApiQuery(params): ApiQuery<CleanupParams>,
) -> Result<Json<CleanupResponse>, ApiError>
where
  S: StateStore + 'static,
{
  let Some(older_than) = present(params.older_than) else {
    return Err(ApiError::BadRequest("olderThan is required".into()));
  };
  let cutoff = parse_bound(&older_than, false)?;

  let session = admin.session();
  let deleted_count = state.fleet.clear_old_logs(&session, cutoff).await?;
  audit(
    &state.fleet,
    &session,
    SYSTEM_SOURCE,
    events::LOGS_CLEANED,
    format!(
      "Deleted {deleted_count} logs older than {}",
      iso_millis(cutoff)
    ),
  )
  .await;

  Ok(Json(CleanupResponse {
    success: true,
    deleted_count,
  }))
}
