//! Backfill Migrator: a resumable, batched, retrying job that populates
//! frozen rates for pre-existing expenses, with rollback.
//!
//! State persistence uses a JSON file (atomic write-to-temp-then-rename)
//! rather than a database row, modeled on the teacher's
//! `ImportRun`/`ImportRunStatus` bookkeeping but generalized from
//! per-account sync state to a single global backfill run, since the
//! Migrator must survive a corrupted or unreachable database between runs.

pub mod engine;
pub mod state;

pub use engine::{Migrator, MigratorConfig, MigrationSummary};
pub use state::{MigrationState, MigrationStatus};
