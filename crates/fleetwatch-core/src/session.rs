//! The caller context passed to every data access operation.

use serde::{Deserialize, Serialize};

/// Identifies who is performing a data access operation.
///
/// Owned by the request scope that created it; never stored globally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
  actor: String,
}

impl Session {
  pub fn new(actor: impl Into<String>) -> Self {
    Self { actor: actor.into() }
  }

  /// The session used by background work that has no requesting client,
  /// such as the live relay.
  pub fn service() -> Self { Self::new("service") }

  pub fn actor(&self) -> &str { &self.actor }
}
