//! Error type for `fleetwatch-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// Paths must be non-empty with no empty segments.
  #[error("invalid path: {0:?}")]
  InvalidPath(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
