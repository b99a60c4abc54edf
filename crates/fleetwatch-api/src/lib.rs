//! JSON REST API for fleetwatch.
//!
//! Exposes an axum [`Router`] backed by any
//! [`fleetwatch_core::store::StateStore`]. TLS and the live channel are the
//! caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", fleetwatch_api::api_router(state.clone()))
//! ```

pub mod account;
pub mod auth;
pub mod contacts;
pub mod error;
pub mod extract;
pub mod identity;
pub mod logs;
pub mod status;
pub mod vehicles;

use std::sync::Arc;

use axum::{
  Router,
  extract::FromRef,
  routing::{delete, get, post, put},
};
use fleetwatch_core::{Fleet, store::StateStore};
use serde::Serialize;

pub use error::ApiError;
pub use identity::{AccountConfig, IdentityProvider, Principal};

// ─── State ───────────────────────────────────────────────────────────────────

/// Shared state threaded through all API handlers.
pub struct ApiState<S> {
  pub fleet:    Fleet<S>,
  pub identity: Arc<IdentityProvider>,
}

impl<S> Clone for ApiState<S> {
  fn clone(&self) -> Self {
    Self {
      fleet:    self.fleet.clone(),
      identity: Arc::clone(&self.identity),
    }
  }
}

impl<S> FromRef<ApiState<S>> for Arc<IdentityProvider> {
  fn from_ref(state: &ApiState<S>) -> Self { Arc::clone(&state.identity) }
}

// ─── Shared response bits ────────────────────────────────────────────────────

/// `{"success": true}`
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Ack {
  pub success: bool,
}

impl Ack {
  pub fn ok() -> Self { Self { success: true } }
}

/// Treat blank strings as missing.
pub(crate) fn present(value: Option<String>) -> Option<String> {
  value.filter(|s| !s.trim().is_empty())
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build a fully-materialised API router.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(state: ApiState<S>) -> Router<()>
where
  S: StateStore + 'static,
{
  Router::new()
    // Accounts
    .route("/auth/login", post(account::login::<S>))
    .route("/auth/logout", post(account::logout::<S>))
    .route("/auth/me", get(account::me))
    .route("/auth/change-password", post(account::change_password::<S>))
    .route("/auth/reset-password", post(account::reset_password::<S>))
    .route("/auth/users/{uid}", put(account::update_user::<S>))
    // Vehicles
    .route("/vehicles", get(vehicles::list::<S>))
    .route("/vehicles/{id}", get(vehicles::get_one::<S>))
    .route("/vehicles/{id}/location", post(vehicles::update_location::<S>))
    .route("/vehicles/{id}/sos", post(vehicles::trigger_sos::<S>))
    .route("/vehicles/{id}/clear-sos", post(vehicles::clear_sos::<S>))
    // Emergency contacts
    .route(
      "/emergency-contacts",
      get(contacts::list::<S>).post(contacts::create::<S>),
    )
    .route(
      "/emergency-contacts/{id}",
      put(contacts::update::<S>).delete(contacts::delete::<S>),
    )
    // System status
    .route(
      "/system-status",
      get(status::get::<S>).put(status::update::<S>),
    )
    .route("/system-status/health", get(status::health::<S>))
    .route("/system-status/issues", post(status::report_issue::<S>))
    // Logs
    .route("/logs", get(logs::list::<S>).post(logs::create::<S>))
    .route("/logs/vehicle/{id}", get(logs::by_vehicle::<S>))
    .route("/logs/system", get(logs::system::<S>))
    .route("/logs/stats", get(logs::stats::<S>))
    .route("/logs/cleanup", delete(logs::cleanup::<S>))
    .with_state(state)
}

#[cfg(test)]
mod tests {
  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
  use fleetwatch_core::{Session, log::events, status::StatusLevel};
  use fleetwatch_store_sqlite::SqliteStore;
  use serde_json::{Value, json};
  use tower::ServiceExt as _;

  use super::*;

  const PASSWORD: &str = "hunter2";

  fn account(uid: &str, admin: bool, device: bool) -> AccountConfig {
    AccountConfig {
      uid: uid.into(),
      email: format!("{uid}@example.com"),
      password_hash: IdentityProvider::hash_password(PASSWORD).unwrap(),
      display_name: None,
      admin,
      device,
    }
  }

  async fn make_state() -> ApiState<SqliteStore> {
    let store = SqliteStore::open_in_memory().await.unwrap();
    ApiState {
      fleet:    Fleet::new(Arc::new(store)),
      identity: Arc::new(IdentityProvider::new([
        account("esp32", false, true),
        account("admin", true, false),
        account("alice", false, false),
      ])),
    }
  }

  fn token_for(state: &ApiState<SqliteStore>, uid: &str) -> String {
    let (_, token) = state
      .identity
      .login(&format!("{uid}@example.com"), PASSWORD)
      .unwrap();
    format!("Bearer {token}")
  }

  async fn send(
    state: &ApiState<SqliteStore>,
    method: &str,
    uri: &str,
    auth: Option<&str>,
    body: Option<Value>,
  ) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
      builder = builder.header(header::AUTHORIZATION, auth);
    }
    let body = match body {
      Some(json) => {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
        Body::from(json.to_string())
      }
      None => Body::empty(),
    };
    let resp = api_router(state.clone())
      .oneshot(builder.body(body).unwrap())
      .await
      .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
      .await
      .unwrap();
    let value = if bytes.is_empty() {
      Value::Null
    } else {
      serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
  }

  // ── Accounts ─────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn device_login_then_location_then_get() {
    let state = make_state().await;

    let (status, body) = send(
      &state,
      "POST",
      "/auth/login",
      None,
      Some(json!({ "email": "esp32@example.com", "password": PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["kind"], "device");
    let auth = format!("Bearer {}", body["token"].as_str().unwrap());

    let (status, body) = send(
      &state,
      "POST",
      "/vehicles/V1/location",
      Some(&auth),
      Some(json!({ "latitude": 35.0, "longitude": -80.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true }));

    let (status, body) = send(&state, "GET", "/vehicles/V1", Some(&auth), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["latitude"], 35.0);
    assert_eq!(body["longitude"], -80.0);
    assert_eq!(body["sos"], false);
    assert_eq!(body["isActive"], true);
  }

  #[tokio::test]
  async fn device_header_is_accepted_without_login() {
    let state = make_state().await;
    let auth = format!("Device {}", B64.encode(format!("esp32:{PASSWORD}")));
    let (status, _) = send(
      &state,
      "POST",
      "/vehicles/V7/location",
      Some(&auth),
      Some(json!({ "latitude": "1.5", "longitude": "2.5" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let v = state
      .fleet
      .get_vehicle(&Session::service(), "V7")
      .await
      .unwrap()
      .unwrap();
    assert_eq!(v.latitude, 1.5);
  }

  #[tokio::test]
  async fn login_validation_and_bad_credentials() {
    let state = make_state().await;
    let (status, body) = send(
      &state,
      "POST",
      "/auth/login",
      None,
      Some(json!({ "email": "alice@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = send(
      &state,
      "POST",
      "/auth/login",
      None,
      Some(json!({ "email": "alice@example.com", "password": "wrong" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn logout_revokes_the_token() {
    let state = make_state().await;
    let auth = token_for(&state, "alice");

    let (status, body) = send(&state, "GET", "/auth/me", Some(&auth), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["uid"], "alice");
    assert_eq!(body["isAdmin"], false);

    let (status, _) = send(&state, "POST", "/auth/logout", Some(&auth), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&state, "GET", "/auth/me", Some(&auth), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
  }

  #[tokio::test]
  async fn change_password_requires_the_current_one() {
    let state = make_state().await;
    let auth = token_for(&state, "alice");
    let (status, _) = send(
      &state,
      "POST",
      "/auth/change-password",
      Some(&auth),
      Some(json!({ "currentPassword": "wrong", "newPassword": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
      &state,
      "POST",
      "/auth/change-password",
      Some(&auth),
      Some(json!({ "currentPassword": PASSWORD, "newPassword": "new-one" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(state.identity.login("alice@example.com", "new-one").is_ok());
  }

  #[tokio::test]
  async fn reset_password_needs_no_credentials() {
    let state = make_state().await;
    let (status, _) = send(
      &state,
      "POST",
      "/auth/reset-password",
      None,
      Some(json!({ "email": "alice@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
      &state,
      "POST",
      "/auth/reset-password",
      None,
      Some(json!({ "email": "nobody@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn admin_updates_profiles() {
    let state = make_state().await;
    let admin = token_for(&state, "admin");
    let (status, _) = send(
      &state,
      "PUT",
      "/auth/users/alice",
      Some(&admin),
      Some(json!({ "displayName": "Alice", "isAdmin": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(state.identity.profile("alice").unwrap().is_admin);

    let (status, _) = send(
      &state,
      "PUT",
      "/auth/users/ghost",
      Some(&admin),
      Some(json!({ "displayName": "Ghost" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
  }

  // ── Vehicles ─────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn unauthenticated_requests_get_401_json() {
    let state = make_state().await;
    let (status, body) = send(&state, "GET", "/vehicles", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());
  }

  #[tokio::test]
  async fn unknown_vehicle_is_404() {
    let state = make_state().await;
    let auth = token_for(&state, "alice");
    let (status, body) = send(&state, "GET", "/vehicles/nope", Some(&auth), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("nope"));
  }

  #[tokio::test]
  async fn missing_coordinates_are_rejected_without_writing() {
    let state = make_state().await;
    let auth = token_for(&state, "alice");

    for body in [
      json!({ "latitude": 35.0 }),
      json!({ "latitude": null, "longitude": 1.0 }),
      json!({ "latitude": "north", "longitude": 1.0 }),
    ] {
      let (status, resp) = send(
        &state,
        "POST",
        "/vehicles/V1/location",
        Some(&auth),
        Some(body),
      )
      .await;
      assert_eq!(status, StatusCode::BAD_REQUEST);
      assert!(resp["error"].is_string());
    }

    let (status, _) = send(&state, "GET", "/vehicles/V1", Some(&auth), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn zero_is_a_valid_coordinate() {
    let state = make_state().await;
    let auth = token_for(&state, "alice");
    let (status, _) = send(
      &state,
      "POST",
      "/vehicles/V0/location",
      Some(&auth),
      Some(json!({ "latitude": 0, "longitude": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
  }

  #[tokio::test]
  async fn malformed_json_is_a_400_with_error_body() {
    let state = make_state().await;
    let auth = token_for(&state, "alice");
    let resp = api_router(state.clone())
      .oneshot(
        Request::builder()
          .method("POST")
          .uri("/vehicles/V1/location")
          .header(header::AUTHORIZATION, &auth)
          .header(header::CONTENT_TYPE, "application/json")
          .body(Body::from("{not json"))
          .unwrap(),
      )
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
      .await
      .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["error"].is_string());
  }

  #[tokio::test]
  async fn sos_then_clear() {
    let state = make_state().await;
    let auth = token_for(&state, "alice");

    let (status, _) = send(&state, "POST", "/vehicles/V1/sos", Some(&auth), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&state, "GET", "/vehicles/V1", Some(&auth), None).await;
    assert_eq!(body["sos"], true);

    let (status, _) = send(&state, "POST", "/vehicles/V1/clear-sos", Some(&auth), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&state, "GET", "/vehicles/V1", Some(&auth), None).await;
    assert_eq!(body["sos"], false);

    let session = Session::service();
    assert!(
      state
        .fleet
        .get_sos_record(&session, "V1")
        .await
        .unwrap()
        .is_none()
    );

    let (_, logs) = send(&state, "GET", "/logs/vehicle/V1", Some(&auth), None).await;
    let events: Vec<_> = logs
      .as_array()
      .unwrap()
      .iter()
      .map(|e| e["event"].as_str().unwrap().to_owned())
      .collect();
    // Same-millisecond entries share a key, so only the later one is certain.
    assert!(events.contains(&events::SOS_CLEARED.to_owned()));
  }

  #[tokio::test]
  async fn location_update_is_audited() {
    let state = make_state().await;
    let auth = token_for(&state, "esp32");

    let (status, _) = send(
      &state,
      "POST",
      "/vehicles/V1/location",
      Some(&auth),
      Some(json!({ "latitude": "12.5", "longitude": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, logs) = send(&state, "GET", "/logs/vehicle/V1", Some(&auth), None).await;
    let logs = logs.as_array().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["event"], events::LOCATION_UPDATED);
    assert_eq!(logs[0]["details"], "Location updated to 12.5, 3");
  }

  #[tokio::test]
  async fn padded_path_ids_resolve_to_the_trimmed_vehicle() {
    let state = make_state().await;
    let auth = token_for(&state, "alice");

    let (status, _) = send(&state, "POST", "/vehicles/%20V1%20/sos", Some(&auth), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&state, "GET", "/vehicles/V1", Some(&auth), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "V1");
    assert_eq!(body["sos"], true);

    let (_, logs) = send(&state, "GET", "/logs/vehicle/%20V1", Some(&auth), None).await;
    let logs = logs.as_array().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["vehicleId"], "V1");
    assert_eq!(logs[0]["event"], events::SOS_TRIGGERED);
  }

  // ── Admin gates ──────────────────────────────────────────────────────────

  #[tokio::test]
  async fn non_admin_cannot_change_status() {
    let state = make_state().await;
    let auth = token_for(&state, "alice");
    let (status, body) = send(
      &state,
      "PUT",
      "/system-status",
      Some(&auth),
      Some(json!({ "status": "outage" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].is_string());

    let current = state
      .fleet
      .get_system_status(&Session::service())
      .await
      .unwrap();
    assert_eq!(current.status, StatusLevel::Operational);
  }

  #[tokio::test]
  async fn non_admin_cannot_write_contacts() {
    let state = make_state().await;
    let auth = token_for(&state, "alice");
    let (status, _) = send(
      &state,
      "POST",
      "/emergency-contacts",
      Some(&auth),
      Some(json!({ "id": "police", "name": "Police", "number": "100", "type": "police" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, contacts) = send(&state, "GET", "/emergency-contacts", Some(&auth), None).await;
    assert_eq!(contacts, json!({}));
  }

  #[tokio::test]
  async fn admin_status_update_validates_the_enum() {
    let state = make_state().await;
    let admin = token_for(&state, "admin");

    let (status, _) = send(
      &state,
      "PUT",
      "/system-status",
      Some(&admin),
      Some(json!({ "status": "on-fire" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
      &state,
      "PUT",
      "/system-status",
      Some(&admin),
      Some(json!({ "status": "maintenance" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&state, "GET", "/system-status", Some(&admin), None).await;
    assert_eq!(body["status"], "maintenance");
    assert!(body["lastUpdated"].is_string());
  }

  #[tokio::test]
  async fn critical_issue_degrades_status() {
    let state = make_state().await;
    let admin = token_for(&state, "admin");
    let (status, _) = send(
      &state,
      "POST",
      "/system-status/issues",
      Some(&admin),
      Some(json!({ "type": "critical", "description": "GPS outage" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, health) = send(&state, "GET", "/system-status/health", Some(&admin), None).await;
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["metrics"]["vehicleCount"], 0);
    assert_eq!(
      health["metrics"]["recentLogs"][0]["event"],
      events::ISSUE_REPORTED
    );
  }

  #[tokio::test]
  async fn contacts_crud() {
    let state = make_state().await;
    let admin = token_for(&state, "admin");

    let (status, _) = send(
      &state,
      "POST",
      "/emergency-contacts",
      Some(&admin),
      Some(json!({ "id": "police", "name": "Police", "number": "100", "type": "police" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
      &state,
      "PUT",
      "/emergency-contacts/police",
      Some(&admin),
      Some(json!({ "name": "Police" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, contacts) = send(&state, "GET", "/emergency-contacts", Some(&admin), None).await;
    assert_eq!(contacts["police"]["number"], "100");

    let (status, _) = send(
      &state,
      "DELETE",
      "/emergency-contacts/police",
      Some(&admin),
      None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, contacts) = send(&state, "GET", "/emergency-contacts", Some(&admin), None).await;
    assert_eq!(contacts, json!({}));
  }

  // ── Logs ─────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn log_endpoints_validate_their_parameters() {
    let state = make_state().await;
    let admin = token_for(&state, "admin");

    let (status, _) = send(&state, "GET", "/logs/stats", Some(&admin), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&state, "DELETE", "/logs/cleanup", Some(&admin), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&state, "GET", "/logs?limit=lots", Some(&admin), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
      &state,
      "POST",
      "/logs",
      Some(&admin),
      Some(json!({ "event": "X" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn cleanup_reports_the_deleted_count() {
    let state = make_state().await;
    let admin = token_for(&state, "admin");

    let (status, _) = send(
      &state,
      "POST",
      "/logs",
      Some(&admin),
      Some(json!({ "vehicleId": "V1", "event": "BOOT" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
      &state,
      "DELETE",
      "/logs/cleanup?olderThan=2999-01-01",
      Some(&admin),
      None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["deletedCount"], 1);

    // Only the cleanup's own audit entry remains.
    let (_, logs) = send(&state, "GET", "/logs/system", Some(&admin), None).await;
    let logs = logs.as_array().unwrap();
    assert!(logs.iter().any(|e| e["event"] == events::LOGS_CLEANED));
    assert!(logs.iter().all(|e| e["event"] != "BOOT"));
  }

  #[tokio::test]
  async fn non_admin_cannot_read_system_logs() {
    let state = make_state().await;
    let auth = token_for(&state, "alice");
    let (status, _) = send(&state, "GET", "/logs/system", Some(&auth), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
  }
}
