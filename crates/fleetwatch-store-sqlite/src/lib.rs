//! SQLite backend for the fleetwatch state store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Change notifications are fanned out
//! in-process over a [`tokio::sync::broadcast`] channel.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
