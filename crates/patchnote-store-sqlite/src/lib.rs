//! SQLite backend for the patchnote update store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Ledger checks and record inserts share
//! one `IMMEDIATE` transaction, which is what makes concurrent writers safe
//! across processes.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
