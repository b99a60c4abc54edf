//! The fleetwatch server: configuration, the live vehicle relay, and the
//! top-level router that mounts the REST API under `/api` next to the
//! `/live` WebSocket channel and an unauthenticated `/health` probe.

pub mod config;
pub mod live;
pub mod relay;

pub use config::ServerConfig;

use std::sync::Arc;

use axum::{
  Json, Router,
  extract::{FromRef, State},
  routing::get,
};
use chrono::{DateTime, Utc};
use fleetwatch_api::{ApiState, IdentityProvider, api_router};
use fleetwatch_core::{
  Fleet, Session,
  fleet::SYSTEM_STATUS,
  store::StateStore,
  time,
  vehicle::Position,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use relay::{LiveRelay, RelayStatus, RetryPolicy};

// ─── Application state ───────────────────────────────────────────────────────

/// Shared state threaded through the top-level handlers.
pub struct AppState<S> {
  pub api:    ApiState<S>,
  pub relay:  LiveRelay<S>,
  pub config: Arc<ServerConfig>,
}

impl<S> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      api:    self.api.clone(),
      relay:  self.relay.clone(),
      config: Arc::clone(&self.config),
    }
  }
}

impl<S> FromRef<AppState<S>> for Arc<IdentityProvider> {
  fn from_ref(state: &AppState<S>) -> Self { Arc::clone(&state.api.identity) }
}

impl<S: StateStore + 'static> AppState<S> {
  /// Wire the data access layer, identity provider, and relay around `store`.
  pub fn new(store: Arc<S>, config: ServerConfig) -> Self {
    let fleet = Fleet::new(store);
    let identity = Arc::new(IdentityProvider::new(config.accounts.iter().cloned()));
    let relay = LiveRelay::new(fleet.clone(), RetryPolicy::from(&config.relay));
    Self {
      api: ApiState { fleet, identity },
      relay,
      config: Arc::new(config),
    }
  }
}

// ─── Router ──────────────────────────────────────────────────────────────────

pub fn router<S>(state: AppState<S>) -> Router
where
  S: StateStore + 'static,
{
  let api = api_router(state.api.clone());
  Router::new()
    .route("/health", get(health::<S>))
    .route("/live", get(live::upgrade::<S>))
    .with_state(state)
    .nest("/api", api)
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::permissive())
}

#[derive(Debug, Serialize)]
pub struct Health {
  pub status:    &'static str,
  pub timestamp: DateTime<Utc>,
  pub store:     &'static str,
  pub relay:     RelayStatus,
}

/// `GET /health`
async fn health<S>(State(state): State<AppState<S>>) -> Json<Health>
where
  S: StateStore + 'static,
{
  let store = match state.api.fleet.store().get(SYSTEM_STATUS).await {
    Ok(_) => "ok",
    Err(e) => {
      tracing::warn!(error = %e, "health probe could not read the store");
      "unavailable"
    }
  };
  Json(Health {
    status: if store == "ok" { "ok" } else { "degraded" },
    timestamp: time::now(),
    store,
    relay: state.relay.status(),
  })
}

// ─── Demo data ───────────────────────────────────────────────────────────────

pub const DEMO_VEHICLE: &str = "ESP32_1";

const DEMO_POSITION: Position = Position {
  latitude:  29.904322,
  longitude: 77.839668,
};

/// Write the demo vehicle unless it already exists. Returns whether it was
/// written.
pub async fn seed_demo_vehicle<S: StateStore>(fleet: &Fleet<S>) -> fleetwatch_core::Result<bool> {
  let session = Session::service();
  if fleet.get_vehicle(&session, DEMO_VEHICLE).await?.is_some() {
    return Ok(false);
  }
  fleet
    .update_vehicle_location(&session, DEMO_VEHICLE, DEMO_POSITION)
    .await?;
  tracing::info!(vehicle_id = DEMO_VEHICLE, "seeded demo vehicle");
  Ok(true)
}
