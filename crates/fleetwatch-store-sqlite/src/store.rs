//! [`SqliteStore`]: the SQLite implementation of [`StateStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension as _, params};
use serde_json::{Map, Value};
use tokio::sync::broadcast::{self, error::RecvError};

use fleetwatch_core::store::{StateStore, Watch, WatchEvent, WriteOp, paths_overlap};

use crate::{
  Result,
  encode::{
    ancestors, assemble, descendant_bounds, pointer, relative_segments, splice, validate_path,
  },
  schema::SCHEMA,
};

/// Capacity of the in-process change feed. A watcher that falls further
/// behind than this re-reads its subtree once instead of replaying.
const CHANGE_BUFFER: usize = 256;

/// Capacity of each watch channel.
const WATCH_BUFFER: usize = 16;

type DbResult<T> = std::result::Result<T, tokio_rusqlite::Error>;

// ─── Store ───────────────────────────────────────────────────────────────────

/// A state store backed by a single SQLite file.
///
/// Cloning is cheap: the inner connection and change feed are shared.
#[derive(Clone)]
pub struct SqliteStore {
  conn:    tokio_rusqlite::Connection,
  changes: broadcast::Sender<String>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::with_connection(conn).await
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::with_connection(conn).await
  }

  async fn with_connection(conn: tokio_rusqlite::Connection) -> Result<Self> {
    let (changes, _) = broadcast::channel(CHANGE_BUFFER);
    let store = Self { conn, changes };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Publish committed paths to every live watcher.
  fn notify(&self, paths: Vec<String>) {
    for path in paths {
      // No receivers simply means nobody is watching.
      let _ = self.changes.send(path);
    }
  }
}

// ─── StateStore impl ─────────────────────────────────────────────────────────

impl StateStore for SqliteStore {
  type Error = crate::Error;

  async fn get(&self, path: &str) -> Result<Option<Value>> {
    validate_path(path)?;
    let path = path.to_owned();
    let value = self.conn.call(move |conn| load(conn, &path)).await?;
    Ok(value)
  }

  async fn set(&self, path: &str, value: Value) -> Result<()> {
    self
      .apply(vec![WriteOp::Set {
        path: path.to_owned(),
        value,
      }])
      .await
  }

  async fn merge(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
    self
      .apply(vec![WriteOp::Merge {
        path: path.to_owned(),
        fields,
      }])
      .await
  }

  async fn remove(&self, path: &str) -> Result<()> {
    self
      .apply(vec![WriteOp::Remove {
        path: path.to_owned(),
      }])
      .await
  }

  async fn apply(&self, batch: Vec<WriteOp>) -> Result<()> {
    if batch.is_empty() {
      return Ok(());
    }
    for op in &batch {
      validate_path(op.path())?;
    }

    let paths: Vec<String> = batch.iter().map(|op| op.path().to_owned()).collect();
    let now = Utc::now().to_rfc3339();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        for op in batch {
          apply_op(&tx, op, &now)?;
        }
        tx.commit()?;
        Ok(())
      })
      .await?;

    tracing::trace!(?paths, "batch committed");
    self.notify(paths);
    Ok(())
  }

  async fn watch(&self, path: &str) -> Result<Watch> {
    validate_path(path)?;

    // Subscribe before the initial read so no commit falls between them.
    let mut changes = self.changes.subscribe();
    let initial = self.get(path).await?;

    let (tx, watch) = Watch::channel(WATCH_BUFFER);
    // The channel is fresh, so the first event always fits.
    let _ = tx.try_send(WatchEvent::Snapshot(initial));

    let store = self.clone();
    let path = path.to_owned();
    tokio::spawn(async move {
      loop {
        tokio::select! {
          () = tx.closed() => break,
          changed = changes.recv() => {
            match changed {
              Ok(changed) if !paths_overlap(&changed, &path) => continue,
              Ok(_) | Err(RecvError::Lagged(_)) => {}
              Err(RecvError::Closed) => break,
            }

            let event = match store.get(&path).await {
              Ok(value) => WatchEvent::Snapshot(value),
              Err(e) => {
                tracing::warn!(%path, error = %e, "watch re-read failed");
                WatchEvent::Failed(e.to_string())
              }
            };
            let failed = matches!(event, WatchEvent::Failed(_));
            if tx.send(event).await.is_err() || failed {
              break;
            }
          }
        }
      }
      tracing::debug!(%path, "watch closed");
    });

    Ok(watch)
  }
}

// ─── Synchronous helpers (run on the database thread) ────────────────────────

fn json_error(e: serde_json::Error) -> tokio_rusqlite::Error {
  tokio_rusqlite::Error::Other(Box::new(e))
}

fn load_exact(conn: &Connection, path: &str) -> DbResult<Option<Value>> {
  let json: Option<String> = conn
    .query_row(
      "SELECT value_json FROM documents WHERE path = ?1",
      params![path],
      |r| r.get(0),
    )
    .optional()?;
  json
    .map(|j| serde_json::from_str(&j).map_err(json_error))
    .transpose()
}

/// Resolve `path` against the stored documents: inside an ancestor document,
/// exactly at `path`, or assembled from descendants.
fn load(conn: &Connection, path: &str) -> DbResult<Option<Value>> {
  for ancestor in ancestors(path) {
    if let Some(doc) = load_exact(conn, ancestor)? {
      return Ok(pointer(doc, &relative_segments(path, ancestor)));
    }
  }

  if let Some(doc) = load_exact(conn, path)? {
    return Ok(Some(doc));
  }

  let (lo, hi) = descendant_bounds(path);
  let mut stmt = conn.prepare(
    "SELECT path, value_json FROM documents
     WHERE path >= ?1 AND path < ?2
     ORDER BY path",
  )?;
  let rows = stmt
    .query_map(params![lo, hi], |r| {
      Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let documents = rows
    .into_iter()
    .map(|(p, json)| Ok((p, serde_json::from_str(&json).map_err(json_error)?)))
    .collect::<DbResult<Vec<_>>>()?;

  Ok(assemble(path, documents))
}

fn upsert(conn: &Connection, path: &str, value: &Value, now: &str) -> DbResult<()> {
  let json = serde_json::to_string(value).map_err(json_error)?;
  conn.execute(
    "INSERT INTO documents (path, value_json, updated_at)
     VALUES (?1, ?2, ?3)
     ON CONFLICT(path) DO UPDATE SET
       value_json = excluded.value_json,
       updated_at = excluded.updated_at",
    params![path, json, now],
  )?;
  Ok(())
}

/// Replace (`Some`) or delete (`None`) the subtree at `path`. A `null`
/// value deletes.
fn store_subtree(conn: &Connection, path: &str, value: Option<Value>, now: &str) -> DbResult<()> {
  let value = value.filter(|v| !v.is_null());

  for ancestor in ancestors(path) {
    if let Some(mut doc) = load_exact(conn, ancestor)? {
      splice(&mut doc, &relative_segments(path, ancestor), value);
      return upsert(conn, ancestor, &doc, now);
    }
  }

  let (lo, hi) = descendant_bounds(path);
  conn.execute(
    "DELETE FROM documents WHERE path = ?1 OR (path >= ?2 AND path < ?3)",
    params![path, lo, hi],
  )?;
  if let Some(value) = value {
    upsert(conn, path, &value, now)?;
  }
  Ok(())
}

fn apply_op(conn: &Connection, op: WriteOp, now: &str) -> DbResult<()> {
  match op {
    WriteOp::Set { path, value } => store_subtree(conn, &path, Some(value), now),
    WriteOp::Merge { path, fields } => {
      let mut doc = match load(conn, &path)? {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
      };
      for (key, value) in fields {
        if value.is_null() {
          doc.remove(&key);
        } else {
          doc.insert(key, value);
        }
      }
      let value = (!doc.is_empty()).then_some(Value::Object(doc));
      store_subtree(conn, &path, value, now)
    }
    WriteOp::Remove { path } => store_subtree(conn, &path, None, now),
  }
}
