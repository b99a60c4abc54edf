//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  extract::rejection::{JsonRejection, QueryRejection},
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::identity::IdentityError;

/// An error returned by an API handler. Every variant renders as
/// `{"error": "<message>"}` with the matching status code.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("{0}")]
  BadRequest(String),

  #[error("{0}")]
  Unauthorized(String),

  #[error("{0}")]
  Forbidden(String),

  #[error("{0}")]
  NotFound(String),

  /// The state store or another collaborator failed.
  #[error("{0}")]
  Upstream(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
      ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if let ApiError::Upstream(e) = &self {
      tracing::error!(error = %e, "request failed");
    }
    (status, Json(json!({ "error": self.to_string() }))).into_response()
  }
}

impl From<fleetwatch_core::Error> for ApiError {
  fn from(e: fleetwatch_core::Error) -> Self {
    use fleetwatch_core::Error;
    match e {
      Error::Validation(m) => ApiError::BadRequest(m),
      e => ApiError::Upstream(Box::new(e)),
    }
  }
}

impl From<IdentityError> for ApiError {
  fn from(e: IdentityError) -> Self {
    match e {
      IdentityError::InvalidCredentials | IdentityError::InvalidToken => {
        ApiError::Unauthorized(e.to_string())
      }
      IdentityError::UnknownAccount(_) => ApiError::NotFound(e.to_string()),
      IdentityError::Hash(_) => ApiError::Upstream(Box::new(e)),
    }
  }
}

impl From<JsonRejection> for ApiError {
  fn from(rejection: JsonRejection) -> Self { ApiError::BadRequest(rejection.body_text()) }
}

impl From<QueryRejection> for ApiError {
  fn from(rejection: QueryRejection) -> Self { ApiError::BadRequest(rejection.body_text()) }
}
