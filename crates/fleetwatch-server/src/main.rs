//! fleetwatch server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`), opens the
//! SQLite state store, and serves the REST API, the live channel, and the
//! health probe over HTTP.
//!
//! Any setting can be overridden from the environment with a `FLEETWATCH__`
//! prefix, e.g. `FLEETWATCH__PORT=8080` or `FLEETWATCH__RELAY__MAX_RETRIES=5`.
//!
//! # Password hash generation
//!
//! To generate the argon2 PHC string for an `[[accounts]]` entry:
//!
//! ```
//! cargo run -p fleetwatch-server -- --hash-password
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::Parser;
use fleetwatch_api::IdentityProvider;
use fleetwatch_server::{AppState, ServerConfig, seed_demo_vehicle};
use fleetwatch_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "fleetwatch vehicle tracking server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the argon2 hash for a password entered on stdin and exit.
  #[arg(long)]
  hash_password: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  if cli.hash_password {
    let password = rpassword_or_stdin()?;
    let hash = IdentityProvider::hash_password(&password)?;
    println!("{hash}");
    return Ok(());
  }

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(
      config::Environment::with_prefix("FLEETWATCH")
        .prefix_separator("__")
        .separator("__"),
    )
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  if server_cfg.accounts.is_empty() {
    tracing::warn!("no accounts configured; every authenticated endpoint will reject requests");
  }

  let store_path = expand_tilde(&server_cfg.store_path);
  if let Some(parent) = store_path.parent().filter(|p| !p.as_os_str().is_empty()) {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create {parent:?}"))?;
  }

  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let address = format!("{}:{}", server_cfg.host, server_cfg.port);
  let state = AppState::new(Arc::new(store), server_cfg);

  if state.config.seed_demo_vehicle {
    seed_demo_vehicle(&state.api.fleet)
      .await
      .context("failed to seed demo vehicle")?;
  }

  let app = fleetwatch_server::router(state);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Read a password from stdin.
fn rpassword_or_stdin() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  print!("Password: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(line.trim_end_matches(['\r', '\n']).to_owned())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
