//! The `StateStore` trait and supporting types.
//!
//! A state store is a hierarchical key-value database addressed by
//! slash-separated paths (`vehicles/ESP32_1`, `system-status`). Values are
//! JSON documents. Reading a path returns either the document stored exactly
//! there or the subtree assembled from the documents stored beneath it.
//!
//! The trait is implemented by storage backends (e.g.
//! `fleetwatch-store-sqlite`). The data access layer and the live relay
//! depend on this abstraction, not on any concrete backend.

use std::future::Future;

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::{Error, Result};

// ─── Paths ───────────────────────────────────────────────────────────────────

/// Characters that may not appear inside a single path segment.
const FORBIDDEN_KEY_CHARS: &[char] = &['/', '.', '#', '$', '[', ']'];

/// Normalise a caller-supplied key: surrounding whitespace is dropped.
///
/// Rejects empty keys and keys containing `/ . # $ [ ]`. Records that carry
/// their own key (a vehicle's `id`, an SOS record's `vehicleId`) must use the
/// returned value so the record always agrees with its path.
pub fn child_key(key: &str) -> Result<&str> {
  let key = key.trim();
  if key.is_empty() {
    return Err(Error::Validation("key must not be empty".into()));
  }
  if let Some(c) = key.chars().find(|c| FORBIDDEN_KEY_CHARS.contains(c)) {
    return Err(Error::Validation(format!(
      "key {key:?} contains forbidden character {c:?}"
    )));
  }
  Ok(key)
}

/// Join `parent` and a caller-supplied `key` into a child path.
pub fn child_path(parent: &str, key: &str) -> Result<String> {
  Ok(format!("{parent}/{}", child_key(key)?))
}

/// `true` if a change at `changed` is visible to a watcher of `watched`:
/// either path is the other, or one lies beneath the other.
pub fn paths_overlap(changed: &str, watched: &str) -> bool {
  fn is_under(path: &str, ancestor: &str) -> bool {
    path
      .strip_prefix(ancestor)
      .is_some_and(|rest| rest.starts_with('/'))
  }
  changed == watched || is_under(changed, watched) || is_under(watched, changed)
}

// ─── Writes ──────────────────────────────────────────────────────────────────

/// A single write, used on its own or as part of an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
  /// Replace the whole subtree at `path`. A `null` value deletes it.
  Set { path: String, value: Value },
  /// Shallow-merge `fields` into the document at `path`.
  Merge {
    path:   String,
    fields: Map<String, Value>,
  },
  /// Delete the subtree at `path`.
  Remove { path: String },
}

impl WriteOp {
  pub fn path(&self) -> &str {
    match self {
      WriteOp::Set { path, .. }
      | WriteOp::Merge { path, .. }
      | WriteOp::Remove { path } => path,
    }
  }
}

// ─── Watches ─────────────────────────────────────────────────────────────────

/// An event delivered on a [`Watch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
  /// The current value of the watched subtree (`None` if empty).
  Snapshot(Option<Value>),
  /// The subscription broke. No further events follow.
  Failed(String),
}

/// A live subscription to a subtree. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Watch {
  rx: mpsc::Receiver<WatchEvent>,
}

impl Watch {
  /// Create a watch together with the sender a backend feeds it through.
  pub fn channel(buffer: usize) -> (mpsc::Sender<WatchEvent>, Self) {
    let (tx, rx) = mpsc::channel(buffer);
    (tx, Self { rx })
  }

  /// Wait for the next event. `None` means the backend hung up.
  pub async fn next(&mut self) -> Option<WatchEvent> { self.rx.recv().await }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a state store backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait StateStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Read the document or assembled subtree at `path`.
  fn get<'a>(
    &'a self,
    path: &'a str,
  ) -> impl Future<Output = Result<Option<Value>, Self::Error>> + Send + 'a;

  /// Overwrite the subtree at `path` with `value`.
  fn set<'a>(
    &'a self,
    path: &'a str,
    value: Value,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Shallow-merge `fields` into the document at `path`, creating it if
  /// necessary. Fields not mentioned are preserved.
  fn merge<'a>(
    &'a self,
    path: &'a str,
    fields: Map<String, Value>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Delete the subtree at `path`. Deleting a missing path is not an error.
  fn remove<'a>(
    &'a self,
    path: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Apply every operation in `batch` atomically: either all of them take
  /// effect or none do. Watchers observe the batch as a single change.
  fn apply(
    &self,
    batch: Vec<WriteOp>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Subscribe to the subtree at `path`.
  ///
  /// Returning `Ok` acknowledges the subscription. The watch first yields
  /// the current snapshot, then a fresh snapshot after every change that
  /// touches the subtree.
  fn watch<'a>(
    &'a self,
    path: &'a str,
  ) -> impl Future<Output = Result<Watch, Self::Error>> + Send + 'a;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn child_path_joins_valid_keys() {
    assert_eq!(child_path("vehicles", "ESP32_1").unwrap(), "vehicles/ESP32_1");
  }

  #[test]
  fn padded_keys_are_normalised() {
    assert_eq!(child_key("  V1 ").unwrap(), "V1");
    assert_eq!(child_path("vehicles", " V1\t").unwrap(), "vehicles/V1");
  }

  #[test]
  fn child_path_rejects_forbidden_characters() {
    for key in ["", "  ", "a/b", "a.b", "a#b", "a$b", "a[b", "a]b"] {
      assert!(
        matches!(child_path("vehicles", key), Err(Error::Validation(_))),
        "accepted {key:?}"
      );
    }
  }

  #[test]
  fn overlap_covers_ancestors_and_descendants() {
    assert!(paths_overlap("vehicles", "vehicles"));
    assert!(paths_overlap("vehicles/V1", "vehicles"));
    assert!(paths_overlap("vehicles", "vehicles/V1"));
    assert!(!paths_overlap("vehicles-archive/V1", "vehicles"));
    assert!(!paths_overlap("sos/V1", "vehicles"));
  }
}
