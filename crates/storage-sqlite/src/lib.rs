//! SQLite storage for the exchange-rate subsystem.
//!
//! This crate provides all database-related functionality using Diesel ORM
//! with SQLite. It implements the repository traits defined in
//! `fxledger-core` and contains:
//! - Database connection pooling and management
//! - Diesel migrations
//! - The Rate Store (`daily_rates`, `frozen_rates`) and an `expenses` table
//!   used by the Migrator and Conversion Engine
//!
//! # Architecture
//!
//! This crate is the only place in the application where Diesel dependencies
//! exist. `fxledger-core` is database-agnostic and works against the
//! `RateStoreTrait`/`ExpenseSource` traits.
//!
//! ```text
//! fxledger-core (domain)
//!       │
//!       ▼
//! fxledger-storage-sqlite (this crate)
//!       │
//!       ▼
//!   SQLite DB
//! ```

pub mod db;
pub mod errors;
pub mod expenses;
pub mod fx;
pub mod schema;
pub mod utils;

// Re-export database utilities
pub use db::{
    backup_database, create_pool, get_connection, get_db_path, init, restore_database,
    restore_database_safe, run_migrations, DbConnection, DbPool, WriteHandle,
};

// Re-export storage errors and conversion helpers
pub use errors::{IntoCore, StorageError};

// Re-export from fxledger-core for convenience
pub use fxledger_core::errors::{DatabaseError, Error, Result};
