//! Core domain entities, services, and traits for the exchange-rate subsystem.
//!
//! This crate is database-agnostic and defines traits implemented by the
//! `storage-sqlite` crate and the `market-data` provider crate.

pub mod config;
pub mod errors;
pub mod events;
pub mod expenses;
pub mod fx;
pub mod migrator;

// Re-export error types
pub use errors::Error;
pub use errors::Result;
