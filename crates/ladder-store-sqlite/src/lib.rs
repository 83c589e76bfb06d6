//! SQLite backend for the Ladder learning store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every check-then-write operation runs
//! inside one `BEGIN IMMEDIATE` transaction, which takes the write lock up
//! front and serialises it against other writers.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;
