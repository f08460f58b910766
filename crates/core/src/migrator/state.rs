//! Persistent state for one Backfill Migrator run.
//!
//! Modeled on the teacher's `ImportRun`/`ImportRunStatus` (status enum,
//! checkpoint fields, `complete()`/`fail()`/`mark_needs_review()` mutation
//! helpers, renamed here to `pause()`), generalized from per-account sync
//! bookkeeping to a single global run and persisted as a JSON file instead
//! of a database row.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Running,
    Completed,
    Failed,
    Paused,
}

/// One recorded per-expense failure that survived its retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationError {
    pub expense_id: i64,
    pub message: String,
}

/// The sole source of truth for a Migrator run across process restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationState {
    pub run_id: String,
    pub status: MigrationStatus,
    pub total_expenses: i64,
    pub processed_count: i64,
    pub migrated_count: i64,
    pub skipped_count: i64,
    pub last_processed_expense_id: i64,
    pub errors: Vec<MigrationError>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub batch_size: i64,
    pub max_retries: u32,
    /// Whether this run supports inverse deletion via `rollback()`. Fixed
    /// at run creation (from `MigratorConfig::enable_rollback`) and
    /// persisted, since `rollback` is typically invoked as a separate CLI
    /// process with its own fresh config that can't know the original
    /// run's intent otherwise.
    pub enable_rollback: bool,
}

impl MigrationState {
    pub fn new(
        run_id: String,
        total_expenses: i64,
        batch_size: i64,
        max_retries: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self::new_with_rollback(run_id, total_expenses, batch_size, max_retries, started_at, true)
    }

    pub fn new_with_rollback(
        run_id: String,
        total_expenses: i64,
        batch_size: i64,
        max_retries: u32,
        started_at: DateTime<Utc>,
        enable_rollback: bool,
    ) -> Self {
        Self {
            run_id,
            status: MigrationStatus::Running,
            total_expenses,
            processed_count: 0,
            migrated_count: 0,
            skipped_count: 0,
            last_processed_expense_id: 0,
            errors: Vec::new(),
            started_at,
            duration_ms: 0,
            batch_size,
            max_retries,
            enable_rollback,
        }
    }

    pub fn record_migrated(&mut self, expense_id: i64) {
        self.processed_count += 1;
        self.migrated_count += 1;
        self.last_processed_expense_id = self.last_processed_expense_id.max(expense_id);
    }

    pub fn record_skipped(&mut self, expense_id: i64) {
        self.processed_count += 1;
        self.skipped_count += 1;
        self.last_processed_expense_id = self.last_processed_expense_id.max(expense_id);
    }

    pub fn record_error(&mut self, expense_id: i64, message: String) {
        self.processed_count += 1;
        self.last_processed_expense_id = self.last_processed_expense_id.max(expense_id);
        self.errors.push(MigrationError { expense_id, message });
    }

    pub fn complete(&mut self, duration_ms: u64) {
        self.status = MigrationStatus::Completed;
        self.duration_ms = duration_ms;
    }

    pub fn fail(&mut self, duration_ms: u64) {
        self.status = MigrationStatus::Failed;
        self.duration_ms = duration_ms;
    }

    pub fn pause(&mut self, duration_ms: u64) {
        self.status = MigrationStatus::Paused;
        self.duration_ms = duration_ms;
    }

    /// Loads state from `path`. A missing or corrupted file is treated as
    /// "no prior state", per the spec's explicit resumability contract.
    pub async fn load(path: &Path) -> Option<Self> {
        let raw = fs::read_to_string(path).await.ok()?;
        serde_json::from_str(&raw).ok()
    }

    /// Atomically persists state: write to a sibling temp file, then
    /// rename over `path`, so a crash mid-write never corrupts the
    /// previous state.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, serialized).await?;
        fs::rename(&tmp_path, path)
            .await
            .map_err(|e| Error::ConfigIO(format!("failed to persist migration state: {e}")))?;
        Ok(())
    }

    pub async fn remove(path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migration-state.json");

        let mut state = MigrationState::new("run-1".to_string(), 10, 50, 3, Utc::now());
        state.record_migrated(5);
        state.save(&path).await.unwrap();

        let loaded = MigrationState::load(&path).await.unwrap();
        assert_eq!(loaded.run_id, "run-1");
        assert_eq!(loaded.last_processed_expense_id, 5);
        assert_eq!(loaded.migrated_count, 1);
    }

    #[tokio::test]
    async fn test_corrupted_file_treated_as_no_prior_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migration-state.json");
        fs::write(&path, b"not json").await.unwrap();

        assert!(MigrationState::load(&path).await.is_none());
    }

    #[tokio::test]
    async fn test_missing_file_treated_as_no_prior_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        assert!(MigrationState::load(&path).await.is_none());
    }
}
