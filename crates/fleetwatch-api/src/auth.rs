//! Authentication extractors.
//!
//! Two `Authorization` schemes are accepted:
//!
//! - `Bearer <token>`: a token minted by `/auth/login`;
//! - `Device <base64(uid:secret)>`: a device account's credential, verified
//!   with argon2 on every request.

use std::sync::Arc;

use axum::{
  extract::{FromRef, FromRequestParts},
  http::{HeaderMap, header, request::Parts},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as B64};

use crate::{
  error::ApiError,
  identity::{IdentityProvider, Principal},
};

fn unauthorized() -> ApiError { ApiError::Unauthorized("authentication required".into()) }

/// The bearer token in `headers`, if the request carries one.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
  headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.strip_prefix("Bearer "))
    .map(str::trim)
}

/// Resolve the caller from the `Authorization` header.
pub fn authenticate(headers: &HeaderMap, identity: &IdentityProvider) -> Result<Principal, ApiError> {
  let value = headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .ok_or_else(unauthorized)?;

  let (scheme, credential) = value.split_once(' ').ok_or_else(unauthorized)?;
  let credential = credential.trim();

  match scheme {
    "Bearer" => Ok(identity.resolve_token(credential)?),
    "Device" => {
      let decoded = B64.decode(credential).map_err(|_| unauthorized())?;
      let decoded = std::str::from_utf8(&decoded).map_err(|_| unauthorized())?;
      let (uid, secret) = decoded.split_once(':').ok_or_else(unauthorized)?;
      Ok(identity.verify_device(uid, secret)?)
    }
    _ => Err(unauthorized()),
  }
}

/// Present in a handler means the request carried valid credentials.
pub struct Authenticated(pub Principal);

impl<S> FromRequestParts<S> for Authenticated
where
  Arc<IdentityProvider>: FromRef<S>,
  S: Send + Sync,
{
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
    let identity = Arc::<IdentityProvider>::from_ref(state);
    let principal = authenticate(&parts.headers, &identity)?;
    Ok(Authenticated(principal))
  }
}

/// Like [`Authenticated`], but additionally requires full access (an admin
/// or a device). Rejects with 403 otherwise.
pub struct Admin(pub Principal);

impl<S> FromRequestParts<S> for Admin
where
  Arc<IdentityProvider>: FromRef<S>,
  S: Send + Sync,
{
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
    let Authenticated(principal) = Authenticated::from_request_parts(parts, state).await?;
    if !principal.has_full_access() {
      tracing::warn!(uid = %principal.uid, path = %parts.uri.path(), "admin access denied");
      return Err(ApiError::Forbidden("admin access required".into()));
    }
    Ok(Admin(principal))
  }
}

#[cfg(test)]
mod tests {
  use axum::http::Request;

  use super::*;
  use crate::identity::{AccountConfig, IdentityProvider};

  fn provider() -> Arc<IdentityProvider> {
    let hash = IdentityProvider::hash_password("secret").unwrap();
    Arc::new(IdentityProvider::new([
      AccountConfig {
        uid: "esp32".into(),
        email: "esp32@devices.local".into(),
        password_hash: hash.clone(),
        display_name: None,
        admin: false,
        device: true,
      },
      AccountConfig {
        uid: "alice".into(),
        email: "alice@example.com".into(),
        password_hash: hash,
        display_name: None,
        admin: false,
        device: false,
      },
    ]))
  }

  async fn extract_admin(auth: Option<String>, idp: &Arc<IdentityProvider>) -> Result<Admin, ApiError> {
    let mut req = Request::builder();
    if let Some(auth) = auth {
      req = req.header(header::AUTHORIZATION, auth);
    }
    let (mut parts, _) = req.body(axum::body::Body::empty()).unwrap().into_parts();
    Admin::from_request_parts(&mut parts, idp).await
  }

  fn device(uid: &str, secret: &str) -> String {
    format!("Device {}", B64.encode(format!("{uid}:{secret}")))
  }

  #[tokio::test]
  async fn device_credential_grants_admin() {
    let idp = provider();
    let Admin(principal) = extract_admin(Some(device("esp32", "secret")), &idp)
      .await
      .unwrap();
    assert_eq!(principal.uid, "esp32");
  }

  #[tokio::test]
  async fn wrong_device_secret_is_unauthorized() {
    let idp = provider();
    let result = extract_admin(Some(device("esp32", "nope")), &idp).await;
    assert!(matches!(result, Err(ApiError::Unauthorized(_))));
  }

  #[tokio::test]
  async fn user_token_is_forbidden_from_admin_routes() {
    let idp = provider();
    let (_, token) = idp.login("alice@example.com", "secret").unwrap();
    let result = extract_admin(Some(format!("Bearer {token}")), &idp).await;
    assert!(matches!(result, Err(ApiError::Forbidden(_))));
  }

  #[tokio::test]
  async fn missing_or_unknown_scheme_is_unauthorized() {
    let idp = provider();
    assert!(matches!(
      extract_admin(None, &idp).await,
      Err(ApiError::Unauthorized(_))
    ));
    assert!(matches!(
      extract_admin(Some("Basic Zm9vOmJhcg==".into()), &idp).await,
      Err(ApiError::Unauthorized(_))
    ));
    assert!(matches!(
      extract_admin(Some("Device !!!".into()), &idp).await,
      Err(ApiError::Unauthorized(_))
    ));
  }
}
