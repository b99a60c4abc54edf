//! The live vehicle relay.
//!
//! One standing subscription to the `vehicles` subtree is shared by every
//! connected live client. Each snapshot the store delivers is normalised and
//! pushed to all clients as a `vehicleUpdates` message.
//!
//! ```text
//! Idle ──connect──▶ Subscribing ──ack──▶ Active
//!                       ▲                  │ error
//!                       └──delay── Retrying ◀┘
//!                                     │ budget exhausted
//!                                     ▼
//!                                   Failed
//! ```
//!
//! A delivered snapshot resets the consecutive-failure count. `Failed` does
//! not heal by itself; the next client connection starts a fresh run. When
//! the last client disconnects the subscription is torn down and the relay
//! returns to `Idle`.

use std::{
  collections::{BTreeMap, HashMap},
  sync::{Arc, Mutex, MutexGuard, PoisonError},
  time::Duration,
};

use fleetwatch_core::{
  Fleet, Session,
  fleet::VEHICLES,
  store::{StateStore, WatchEvent},
  vehicle::Vehicle,
};
use serde::{Deserialize, Serialize};
use tokio::{
  sync::mpsc::{self, error::TrySendError},
  task::JoinHandle,
};
use uuid::Uuid;

use crate::config::RelayConfig;

/// Messages queued per client before further updates are dropped for it.
const CLIENT_BUFFER: usize = 32;

// ─── Messages ────────────────────────────────────────────────────────────────

/// Server → client frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
  VehicleUpdates {
    vehicles: BTreeMap<String, Vehicle>,
  },
  Error {
    message: String,
  },
}

/// Client → server frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
  /// Reply with the current vehicle collection.
  GetVehicles,
}

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum RelayState {
  Idle,
  Subscribing,
  Active,
  /// Waiting before resubscribing. `attempt` counts consecutive failures.
  Retrying { attempt: u32 },
  Failed,
}

/// Reported by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayStatus {
  #[serde(flatten)]
  pub state:   RelayState,
  pub clients: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_retries: u32,
  pub delay:       Duration,
}

impl From<&RelayConfig> for RetryPolicy {
  fn from(config: &RelayConfig) -> Self {
    Self {
      max_retries: config.max_retries,
      delay:       config.retry_delay(),
    }
  }
}

// ─── Relay ───────────────────────────────────────────────────────────────────

struct Shared {
  state:      RelayState,
  clients:    HashMap<Uuid, mpsc::Sender<ServerMessage>>,
  task:       Option<JoinHandle<()>>,
  /// Bumped whenever the running task is replaced or torn down, so a stale
  /// task can no longer touch state or clients.
  generation: u64,
}

struct Inner<S> {
  fleet:  Fleet<S>,
  policy: RetryPolicy,
  shared: Mutex<Shared>,
}

/// Handle to the relay. Cloning is cheap.
pub struct LiveRelay<S> {
  inner: Arc<Inner<S>>,
}

impl<S> Clone for LiveRelay<S> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<S> LiveRelay<S> {
  pub fn state(&self) -> RelayState { self.lock().state }

  pub fn client_count(&self) -> usize { self.lock().clients.len() }

  pub fn status(&self) -> RelayStatus {
    let shared = self.lock();
    RelayStatus {
      state:   shared.state,
      clients: shared.clients.len(),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Shared> { self.inner.lock() }

  /// Unregister a client. The last one out tears the subscription down.
  fn disconnect(&self, id: Uuid) {
    let mut shared = self.lock();
    shared.clients.remove(&id);
    tracing::debug!(client = %id, remaining = shared.clients.len(), "live client disconnected");

    if shared.clients.is_empty() {
      if let Some(task) = shared.task.take() {
        task.abort();
      }
      shared.generation += 1;
      shared.state = RelayState::Idle;
      tracing::info!("last live client gone, vehicle subscription stopped");
    }
  }
}

impl<S: StateStore + 'static> LiveRelay<S> {
  pub fn new(fleet: Fleet<S>, policy: RetryPolicy) -> Self {
    Self {
      inner: Arc::new(Inner {
        fleet,
        policy,
        shared: Mutex::new(Shared {
          state:      RelayState::Idle,
          clients:    HashMap::new(),
          task:       None,
          generation: 0,
        }),
      }),
    }
  }

  /// Register a client, starting the subscription if it is not running.
  pub fn connect(&self) -> RelayClient<S> {
    let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
    let id = Uuid::new_v4();

    let mut shared = self.lock();
    shared.clients.insert(id, tx);
    tracing::debug!(client = %id, total = shared.clients.len(), "live client connected");
    self.start_locked(&mut shared);
    drop(shared);

    RelayClient {
      id,
      rx,
      relay: self.clone(),
    }
  }

  /// Start the subscription if it is `Idle` or `Failed`.
  pub fn start(&self) {
    let mut shared = self.lock();
    self.start_locked(&mut shared);
  }

  fn start_locked(&self, shared: &mut Shared) {
    if !matches!(shared.state, RelayState::Idle | RelayState::Failed) {
      return;
    }
    if let Some(task) = shared.task.take() {
      task.abort();
    }
    shared.generation += 1;
    shared.state = RelayState::Subscribing;

    let generation = shared.generation;
    let inner = Arc::clone(&self.inner);
    shared.task = Some(tokio::spawn(inner.run(generation)));
  }

  /// A one-off read of the current vehicle collection, independent of the
  /// standing subscription.
  pub async fn snapshot(&self, session: &Session) -> ServerMessage {
    match self.inner.fleet.get_vehicles(session).await {
      Ok(vehicles) => ServerMessage::VehicleUpdates { vehicles },
      Err(e) => {
        tracing::warn!(error = %e, actor = session.actor(), "vehicle snapshot failed");
        ServerMessage::Error {
          message: format!("failed to fetch vehicles: {e}"),
        }
      }
    }
  }
}

impl<S> Inner<S> {
  fn lock(&self) -> MutexGuard<'_, Shared> {
    self.shared.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Returns `false` once this task has been superseded.
  fn set_state(&self, generation: u64, state: RelayState) -> bool {
    let mut shared = self.lock();
    if shared.generation != generation {
      return false;
    }
    shared.state = state;
    true
  }

  fn broadcast(&self, generation: u64, message: &ServerMessage) {
    let shared = self.lock();
    if shared.generation != generation {
      return;
    }
    for (id, tx) in &shared.clients {
      match tx.try_send(message.clone()) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
          tracing::warn!(client = %id, "live client queue full, dropping message");
        }
        // The client is on its way out; `disconnect` will remove it.
        Err(TrySendError::Closed(_)) => {}
      }
    }
  }
}

impl<S: StateStore + 'static> Inner<S> {
  async fn run(self: Arc<Self>, generation: u64) {
    let mut failures = 0u32;

    loop {
      if !self.set_state(generation, RelayState::Subscribing) {
        return;
      }

      match self.fleet.store().watch(VEHICLES).await {
        Ok(mut watch) => {
          if !self.set_state(generation, RelayState::Active) {
            return;
          }
          tracing::info!("vehicle subscription active");

          let reason = loop {
            match watch.next().await {
              Some(WatchEvent::Snapshot(raw)) => {
                failures = 0;
                let vehicles = Vehicle::collection_from_stored(raw);
                tracing::debug!(count = vehicles.len(), "relaying vehicle snapshot");
                self.broadcast(generation, &ServerMessage::VehicleUpdates { vehicles });
              }
              Some(WatchEvent::Failed(reason)) => break reason,
              None => break "subscription closed by store".to_owned(),
            }
          };
          tracing::warn!(%reason, "vehicle subscription lost");
        }
        Err(e) => tracing::warn!(error = %e, "vehicle subscription refused"),
      }

      if failures >= self.policy.max_retries {
        tracing::error!(
          attempts = failures + 1,
          "vehicle subscription failed, giving up"
        );
        if self.set_state(generation, RelayState::Failed) {
          self.broadcast(generation, &ServerMessage::Error {
            message: format!(
              "live vehicle updates unavailable after {} attempts",
              failures + 1
            ),
          });
        }
        return;
      }

      failures += 1;
      if !self.set_state(generation, RelayState::Retrying { attempt: failures }) {
        return;
      }
      tracing::info!(
        attempt = failures,
        delay_secs = self.policy.delay.as_secs(),
        "retrying vehicle subscription"
      );
      tokio::time::sleep(self.policy.delay).await;
    }
  }
}

// ─── Clients ─────────────────────────────────────────────────────────────────

/// A registered live client. Dropping it disconnects.
pub struct RelayClient<S> {
  id:    Uuid,
  rx:    mpsc::Receiver<ServerMessage>,
  relay: LiveRelay<S>,
}

impl<S> RelayClient<S> {
  pub fn id(&self) -> Uuid { self.id }

  /// The next broadcast message.
  pub async fn recv(&mut self) -> Option<ServerMessage> { self.rx.recv().await }
}

impl<S> Drop for RelayClient<S> {
  fn drop(&mut self) { self.relay.disconnect(self.id); }
}
