//! SQLite driver for the record store
//!
//! This module provides:
//! - Connection pooling (r2d2-sqlite)
//! - WAL mode + busy timeout pragmas on every pooled connection
//! - Forward-only schema migrations tracked in `PRAGMA user_version`

pub mod connection;
pub mod migrations;

pub use connection::{DbOptions, initialize_pool};
pub use migrations::{SCHEMA_VERSION, migrate_to_latest};

/// Pool type shared by the store and the CLI.
pub type DbPool = r2d2::Pool<r2d2_sqlite::SqliteConnectionManager>;
