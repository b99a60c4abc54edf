//! SQL schema for the fleetwatch SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
///
/// Each row is one JSON document. A document's path never has a stored
/// ancestor or descendant: writes beneath an existing document are spliced
/// into it, and writes above existing documents replace them.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS documents (
    path        TEXT PRIMARY KEY,   -- slash-separated, e.g. 'vehicles/V1'
    value_json  TEXT NOT NULL,
    updated_at  TEXT NOT NULL       -- ISO 8601 UTC
);

PRAGMA user_version = 1;
";
