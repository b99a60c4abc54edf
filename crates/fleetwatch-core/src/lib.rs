//! Core types, the state store abstraction, and the data access layer for
//! fleetwatch.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! All other crates depend on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod contact;
pub mod error;
pub mod fleet;
pub mod log;
pub mod session;
pub mod sos;
pub mod status;
pub mod store;
pub mod time;
pub mod vehicle;

pub use error::{Error, Result};
pub use fleet::Fleet;
pub use session::Session;
