//! The Rate Store: SQLite-backed `DailyRate`/`FrozenRate` persistence.

mod repository;

pub use repository::SqliteRateStore;
