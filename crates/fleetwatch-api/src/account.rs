//! Handlers for `/auth` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/auth/login` | Body: `{"email","password"}`; no credentials needed |
//! | `POST` | `/auth/logout` | Revokes the bearer token, if any |
//! | `GET`  | `/auth/me` | The caller's profile |
//! | `POST` | `/auth/change-password` | Body: `{"currentPassword","newPassword"}` |
//! | `POST` | `/auth/reset-password` | Body: `{"email"}`; no credentials needed |
//! | `PUT`  | `/auth/users/:uid` | Admin. Body: `{"displayName"?, "isAdmin"?}` |

use axum::{
  Json,
  extract::{Path, State},
  http::HeaderMap,
};
use fleetwatch_core::{
  log::{SYSTEM_SOURCE, events},
  store::StateStore,
};
use serde::{Deserialize, Serialize};

use crate::{
  Ack, ApiState,
  auth::{Admin, Authenticated, bearer_token},
  error::ApiError,
  extract::ApiJson,
  identity::{IdentityError, Principal},
  logs::audit,
  present,
};

// ─── Login / logout ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginBody {
  pub email:    Option<String>,
  pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
  pub user:  Principal,
  pub token: String,
}

/// `POST /auth/login`
pub async fn login<S>(
  State(state): State<ApiState<S>>,
  ApiJson(body): ApiJson<LoginBody>,
) -> Result<Json<LoginResponse>, ApiError>
where
  S: StateStore + 'static,
{
  let (Some(email), Some(password)) = (present(body.email), present(body.password)) else {
    return Err(ApiError::BadRequest("email and password are required".into()));
  };

  let (user, token) = state.identity.login(&email, &password)?;
  tracing::info!(uid = %user.uid, "user logged in");

  audit(
    &state.fleet,
    &user.session(),
    SYSTEM_SOURCE,
    events::USER_LOGIN,
    format!("User logged in: {email}"),
  )
  .await;

  Ok(Json(LoginResponse { user, token }))
}

/// `POST /auth/logout`
pub async fn logout<S>(
  State(state): State<ApiState<S>>,
  Authenticated(principal): Authenticated,
  headers: HeaderMap,
) -> Result<Json<Ack>, ApiError>
where
  S: StateStore + 'static,
{
  if let Some(token) = bearer_token(&headers) {
    state.identity.logout(token);
  }

  audit(
    &state.fleet,
    &principal.session(),
    SYSTEM_SOURCE,
    events::USER_LOGOUT,
    format!("User logged out: {}", principal.email),
  )
  .await;

  Ok(Json(Ack::ok()))
}

/// `GET /auth/me`
pub async fn me(Authenticated(principal): Authenticated) -> Json<Principal> { Json(principal) }

// ─── Passwords ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordBody {
  pub current_password: Option<String>,
  pub new_password:     Option<String>,
}

/// `POST /auth/change-password`
pub async fn change_password<S>(
  State(state): State<ApiState<S>>,
  Authenticated(principal): Authenticated,
  ApiJson(body): ApiJson<ChangePasswordBody>,
) -> Result<Json<Ack>, ApiError>
where
  S: StateStore + 'static,
{
  let (Some(current), Some(new)) = (present(body.current_password), present(body.new_password))
  else {
    return Err(ApiError::BadRequest(
      "current password and new password are required".into(),
    ));
  };

  state
    .identity
    .change_password(&principal.uid, &current, &new)
    .map_err(|e| match e {
      IdentityError::InvalidCredentials => {
        ApiError::BadRequest("current password is incorrect".into())
      }
      e => e.into(),
    })?;

  audit(
    &state.fleet,
    &principal.session(),
    SYSTEM_SOURCE,
    events::PASSWORD_CHANGED,
    format!("Password changed for user: {}", principal.email),
  )
  .await;

  Ok(Json(Ack::ok()))
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordBody {
  pub email: Option<String>,
}

/// `POST /auth/reset-password`
pub async fn reset_password<S>(
  State(state): State<ApiState<S>>,
  ApiJson(body): ApiJson<ResetPasswordBody>,
) -> Result<Json<Ack>, ApiError>
where
  S: StateStore + 'static,
{
  let Some(email) = present(body.email) else {
    return Err(ApiError::BadRequest("email is required".into()));
  };

  state
    .identity
    .request_password_reset(&email)
    .map_err(|e| match e {
      e @ IdentityError::UnknownAccount(_) => ApiError::BadRequest(e.to_string()),
      e => e.into(),
    })?;

  audit(
    &state.fleet,
    &fleetwatch_core::Session::service(),
    SYSTEM_SOURCE,
    events::PASSWORD_RESET_REQUESTED,
    format!("Password reset requested for: {email}"),
  )
  .await;

  Ok(Json(Ack::ok()))
}

// ─── Profiles ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserBody {
  pub display_name: Option<String>,
  pub is_admin:     Option<bool>,
}

/// `PUT /auth/users/:uid`
pub async fn update_user<S>(
  State(state): State<ApiState<S>>,
  Admin(admin): Admin,
  Path(uid): Path<String>,
  ApiJson(body): ApiJson<UpdateUserBody>,
) -> Result<Json<Ack>, ApiError>
where
  S: StateStore + 'static,
{
  state
    .identity
    .update_profile(&uid, body.display_name, body.is_admin)?;

  audit(
    &state.fleet,
    &admin.session(),
    SYSTEM_SOURCE,
    events::USER_UPDATED,
    format!("User profile updated: {uid}"),
  )
  .await;

  Ok(Json(Ack::ok()))
}
