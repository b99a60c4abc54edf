//! Error types for `fleetwatch-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A required field was missing or a supplied value was malformed.
  #[error("{0}")]
  Validation(String),

  /// The state store rejected or failed an operation.
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  pub(crate) fn store<E>(e: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
