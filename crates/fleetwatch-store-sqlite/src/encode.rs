//! Path arithmetic and JSON tree splicing between the hierarchical key space
//! and the flat `documents` table.
//!
//! Paths are compared byte-wise. Every path strictly beneath `p` starts with
//! `p/`, so the half-open range `["p/", "p0")` selects exactly the
//! descendants of `p` (`'0'` is the byte after `'/'`).

use serde_json::{Map, Value};

use crate::{Error, Result};

// ─── Paths ───────────────────────────────────────────────────────────────────

pub fn validate_path(path: &str) -> Result<()> {
  if path.is_empty() || path.split('/').any(str::is_empty) {
    return Err(Error::InvalidPath(path.to_owned()));
  }
  Ok(())
}

/// Half-open byte range covering every descendant of `path`.
pub fn descendant_bounds(path: &str) -> (String, String) {
  (format!("{path}/"), format!("{path}0"))
}

/// Proper ancestors of `path`, nearest first: `a/b/c` → `a/b`, `a`.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
  path.rmatch_indices('/').map(move |(i, _)| &path[..i])
}

/// Segments of `path` below `ancestor`.
pub fn relative_segments<'a>(path: &'a str, ancestor: &str) -> Vec<&'a str> {
  path[ancestor.len() + 1..].split('/').collect()
}

// ─── Trees ───────────────────────────────────────────────────────────────────

/// Follow `segments` down into `value`.
pub fn pointer(value: Value, segments: &[&str]) -> Option<Value> {
  let mut node = value;
  for segment in segments {
    node = match node {
      Value::Object(mut map) => map.remove(*segment)?,
      _ => return None,
    };
  }
  Some(node)
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
  if !value.is_object() {
    *value = Value::Object(Map::new());
  }
  match value {
    Value::Object(map) => map,
    _ => unreachable!("value was just replaced with an object"),
  }
}

/// Replace (`Some`) or delete (`None`) the node at `segments` within `root`.
/// Intermediate objects are created on insert; deleting a missing node is a
/// no-op.
pub fn splice(root: &mut Value, segments: &[&str], value: Option<Value>) {
  let Some((last, parents)) = segments.split_last() else {
    return;
  };

  match value {
    Some(value) => {
      let mut node = root;
      for segment in parents {
        node = ensure_object(node)
          .entry((*segment).to_owned())
          .or_insert(Value::Null);
      }
      ensure_object(node).insert((*last).to_owned(), value);
    }
    None => {
      let mut node = root;
      for segment in parents {
        match node.get_mut(*segment) {
          Some(child) => node = child,
          None => return,
        }
      }
      if let Value::Object(map) = node {
        map.remove(*last);
      }
    }
  }
}

/// Build the subtree rooted at `path` from its descendant documents.
pub fn assemble(path: &str, documents: Vec<(String, Value)>) -> Option<Value> {
  if documents.is_empty() {
    return None;
  }
  let mut root = Value::Object(Map::new());
  for (doc_path, value) in documents {
    splice(&mut root, &relative_segments(&doc_path, path), Some(value));
  }
  Some(root)
}
