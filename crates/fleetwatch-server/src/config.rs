//! Runtime configuration, deserialised from `config.toml` layered with
//! `FLEETWATCH__*` environment variables.

use std::{path::PathBuf, time::Duration};

use fleetwatch_api::AccountConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:              String,
  #[serde(default = "default_port")]
  pub port:              u16,
  #[serde(default = "default_store_path")]
  pub store_path:        PathBuf,
  #[serde(default)]
  pub relay:             RelayConfig,
  #[serde(default)]
  pub accounts:          Vec<AccountConfig>,
  /// Write the demo vehicle at startup if it does not exist yet.
  #[serde(default)]
  pub seed_demo_vehicle: bool,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:              default_host(),
      port:              default_port(),
      store_path:        default_store_path(),
      relay:             RelayConfig::default(),
      accounts:          Vec::new(),
      seed_demo_vehicle: false,
    }
  }
}

/// The `[relay]` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RelayConfig {
  /// Consecutive subscription failures tolerated before giving up.
  #[serde(default = "default_max_retries")]
  pub max_retries:      u32,
  #[serde(default = "default_retry_delay_secs")]
  pub retry_delay_secs: u64,
}

impl RelayConfig {
  pub fn retry_delay(&self) -> Duration { Duration::from_secs(self.retry_delay_secs) }
}

impl Default for RelayConfig {
  fn default() -> Self {
    Self {
      max_retries:      default_max_retries(),
      retry_delay_secs: default_retry_delay_secs(),
    }
  }
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 3003 }
fn default_store_path() -> PathBuf { PathBuf::from("~/.local/share/fleetwatch/state.sqlite3") }
fn default_max_retries() -> u32 { 3 }
fn default_retry_delay_secs() -> u64 { 5 }
