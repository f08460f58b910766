//! A minimal, Diesel-backed `ExpenseSource` implementation over the
//! `expenses` table, used by the Migrator's read-only scan and the
//! Conversion Engine's expense-id-bearing lookups in this deployment.
//!
//! The host application's real expense CRUD may live in its own table
//! entirely; this repository exists so the crate is runnable end-to-end
//! without an external expense store to integrate against.

mod repository;

pub use repository::SqliteExpenseRepository;
