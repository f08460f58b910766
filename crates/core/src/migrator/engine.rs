//! The Backfill Migrator engine: batches through pre-existing expenses,
//! deriving and freezing a plausible rate set for each one that still
//! lacks frozen rates.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{info, warn};
use rust_decimal::Decimal;

use crate::errors::Result;
use crate::expenses::{Expense, ExpenseSource};
use crate::fx::cache::{Cache, CacheKeyType};
use crate::fx::currencies::CurrencySet;
use crate::fx::rate_store::{RatePair, RateStoreTrait};
use crate::migrator::state::{MigrationState, MigrationStatus};
use fxledger_market_data::RateProvider;

/// Tunables for one Migrator run, matching the spec's enumerated
/// configuration surface.
#[derive(Debug, Clone)]
pub struct MigratorConfig {
    pub batch_size: i64,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub progress_report_interval: i64,
    pub state_file: PathBuf,
    /// Append-only log of batch and completion lines, ISO-8601 timestamped.
    /// `None` disables file logging (progress still goes through `log`).
    pub log_file: Option<PathBuf>,
    pub enable_rollback: bool,
    /// Window (days) used by tier 2's `find_nearest_daily` lookup. Spec
    /// default: 30 (wider than the Conversion Engine's interpolation window,
    /// since a one-off migration can tolerate more drift than a live read).
    pub nearest_window_days: i64,
}

/// Spec default for [`MigratorConfig::nearest_window_days`].
const DEFAULT_NEAREST_WINDOW_DAYS: i64 = 30;

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            progress_report_interval: 100,
            state_file: PathBuf::from("migration-state.json"),
            log_file: None,
            enable_rollback: true,
            nearest_window_days: DEFAULT_NEAREST_WINDOW_DAYS,
        }
    }
}

/// Appends a single ISO-8601-timestamped line to `path`, creating it if
/// absent. Failures are logged, not propagated: the append-only log is a
/// debugging aid, not part of the resumability contract.
async fn append_log_line(path: &std::path::Path, line: &str) {
    use tokio::io::AsyncWriteExt;

    let result: std::io::Result<()> = async {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(format!("{} {}\n", Utc::now().to_rfc3339(), line).as_bytes())
            .await
    }
    .await;

    if let Err(err) = result {
        warn!("migrator: failed to append to log file {:?}: {}", path, err);
    }
}

/// Summary returned when a run reaches a terminal or paused state.
#[derive(Debug, Clone)]
pub struct MigrationSummary {
    pub state: MigrationState,
}

pub struct Migrator {
    expenses: Arc<dyn ExpenseSource>,
    store: Arc<dyn RateStoreTrait>,
    provider: Arc<dyn RateProvider>,
    cache: Arc<Cache>,
    currencies: CurrencySet,
    config: MigratorConfig,
    cancel: Arc<AtomicBool>,
}

impl Migrator {
    pub fn new(
        expenses: Arc<dyn ExpenseSource>,
        store: Arc<dyn RateStoreTrait>,
        provider: Arc<dyn RateProvider>,
        cache: Arc<Cache>,
        currencies: CurrencySet,
        config: MigratorConfig,
    ) -> Self {
        Self {
            expenses,
            store,
            provider,
            cache,
            currencies,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A shared flag the caller can set (e.g. from a Ctrl-C handler) to
    /// request that the run pause at the next batch boundary rather than
    /// run to completion. `run()` checks it after persisting each batch.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Runs the migration to completion, a pause, or a failure. Resumes
    /// from `config.state_file` if present.
    pub async fn run(&self) -> Result<MigrationSummary> {
        let start = Instant::now();

        let mut state = match MigrationState::load(&self.config.state_file).await {
            Some(state) => {
                info!(
                    "migrator: resuming run {} from expense id {}",
                    state.run_id, state.last_processed_expense_id
                );
                state
            }
            None => {
                let total = self.expenses.count().await?;
                MigrationState::new_with_rollback(
                    format!("migration-{}", Utc::now().timestamp()),
                    total,
                    self.config.batch_size,
                    self.config.max_retries,
                    Utc::now(),
                    self.config.enable_rollback,
                )
            }
        };

        loop {
            let batch = self
                .expenses
                .next_batch(state.last_processed_expense_id, self.config.batch_size)
                .await;

            let batch = match batch {
                Ok(batch) => batch,
                Err(err) => {
                    warn!("migrator: infrastructure failure fetching batch: {}", err);
                    state.fail(start.elapsed().as_millis() as u64);
                    state.save(&self.config.state_file).await?;
                    return Ok(MigrationSummary { state });
                }
            };

            if batch.is_empty() {
                state.complete(start.elapsed().as_millis() as u64);
                state.save(&self.config.state_file).await?;
                info!(
                    "migrator: run {} completed — {} migrated, {} skipped, {} errors",
                    state.run_id,
                    state.migrated_count,
                    state.skipped_count,
                    state.errors.len()
                );
                if let Some(log_file) = &self.config.log_file {
                    append_log_line(
                        log_file,
                        &format!(
                            "run {} completed: migrated={} skipped={} errors={}",
                            state.run_id,
                            state.migrated_count,
                            state.skipped_count,
                            state.errors.len()
                        ),
                    )
                    .await;
                }
                return Ok(MigrationSummary { state });
            }

            for expense in &batch {
                self.process_expense(expense, &mut state).await;

                if state.processed_count % self.config.progress_report_interval == 0 {
                    let remaining = state.total_expenses - state.processed_count;
                    let elapsed = start.elapsed().as_secs_f64().max(0.001);
                    let rate = state.processed_count as f64 / elapsed;
                    let eta_secs = if rate > 0.0 { remaining as f64 / rate } else { 0.0 };
                    info!(
                        "migrator: progress {}/{} (eta {:.0}s)",
                        state.processed_count, state.total_expenses, eta_secs
                    );
                    if let Some(log_file) = &self.config.log_file {
                        append_log_line(
                            log_file,
                            &format!(
                                "progress {}/{} eta={:.0}s",
                                state.processed_count, state.total_expenses, eta_secs
                            ),
                        )
                        .await;
                    }
                }
            }

            state.save(&self.config.state_file).await?;

            if self.cancel.load(Ordering::SeqCst) {
                state.pause(start.elapsed().as_millis() as u64);
                state.save(&self.config.state_file).await?;
                info!(
                    "migrator: run {} paused at expense id {} by cancellation request",
                    state.run_id, state.last_processed_expense_id
                );
                if let Some(log_file) = &self.config.log_file {
                    append_log_line(
                        log_file,
                        &format!(
                            "run {} paused at expense id {}",
                            state.run_id, state.last_processed_expense_id
                        ),
                    )
                    .await;
                }
                return Ok(MigrationSummary { state });
            }
        }
    }

    /// Derives and freezes rates for one expense, tolerating per-expense
    /// errors up to `max_retries`.
    async fn process_expense(&self, expense: &Expense, state: &mut MigrationState) {
        match self.store.count_frozen(expense.id).await {
            Ok(count) if count > 0 => {
                state.record_skipped(expense.id);
                return;
            }
            Ok(_) => {}
            Err(err) => {
                self.log_error(expense.id, &err.to_string()).await;
                state.record_error(expense.id, err.to_string());
                return;
            }
        }

        let mut attempt = 0;
        loop {
            match self.derive_and_freeze(expense).await {
                Ok(()) => {
                    state.record_migrated(expense.id);
                    return;
                }
                Err(err) if attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        "migrator: retrying expense {} (attempt {}/{}): {}",
                        expense.id, attempt, self.config.max_retries, err
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(err) => {
                    self.log_error(expense.id, &err.to_string()).await;
                    state.record_error(expense.id, err.to_string());
                    return;
                }
            }
        }
    }

    async fn log_error(&self, expense_id: i64, message: &str) {
        if let Some(log_file) = &self.config.log_file {
            append_log_line(log_file, &format!("error expense={} {}", expense_id, message)).await;
        }
    }

    async fn derive_and_freeze(&self, expense: &Expense) -> Result<()> {
        let base = self.currencies.base();
        let mut pairs: Vec<RatePair> = Vec::new();

        // Tier 1: legacy conversionRate field.
        if expense.currency != base {
            if let Some(rate) = expense.legacy_conversion_rate {
                if !rate.is_zero() {
                    pairs.push((expense.currency.clone(), base.to_string(), rate));
                    if let Some(inverse) = Decimal::ONE.checked_div(rate) {
                        pairs.push((base.to_string(), expense.currency.clone(), inverse));
                    }
                }
            }
        }

        // Tier 2 + 3: every other ordered pair in S x S.
        for (from, to) in self.currencies.ordered_pairs() {
            if pairs.iter().any(|(f, t, _)| f == &from && t == &to) {
                continue;
            }

            if let Some(nearest) = self
                .store
                .find_nearest_daily(
                    &from,
                    &to,
                    expense.transaction_date,
                    self.config.nearest_window_days,
                )
                .await?
            {
                pairs.push((from, to, nearest.rate));
                continue;
            }

            match self.current_rate_via_cache(&from, &to).await {
                Ok(rate) => pairs.push((from, to, rate)),
                Err(err) => warn!(
                    "migrator: no rate derivable for {}->{} on expense {}: {}",
                    from, to, expense.id, err
                ),
            }
        }

        if pairs.is_empty() {
            return Err(crate::errors::Error::MigrationFailure(format!(
                "no rates derivable for expense {}",
                expense.id
            )));
        }

        self.store.put_frozen(expense.id, &pairs).await
    }

    async fn current_rate_via_cache(&self, from: &str, to: &str) -> Result<Decimal> {
        let key = format!("{}:{}", from, to);
        let provider = Arc::clone(&self.provider);
        let from_owned = from.to_string();
        let to_owned = to.to_string();

        self.cache
            .get_or_compute(CacheKeyType::CurrentRate, &key, move || {
                let provider = Arc::clone(&provider);
                let from_owned = from_owned.clone();
                let to_owned = to_owned.clone();
                async move {
                    let rates = provider
                        .get_latest_rates(&from_owned, &[to_owned.clone()])
                        .await?;
                    rates.get(&to_owned).copied().ok_or_else(|| {
                        crate::errors::Error::Fx(crate::fx::FxError::RateNotFound {
                            from: from_owned.clone(),
                            to: to_owned.clone(),
                        })
                    })
                }
            })
            .await
    }

    /// Deletes every FrozenRate touched by any prior run and removes the
    /// state file. Pages deletions in batches of 100. Refuses if the
    /// persisted run state has `enable_rollback: false` (the rollback
    /// invocation builds its own fresh `MigratorConfig`, so the run's own
    /// recorded flag — not `self.config`'s — is authoritative).
    pub async fn rollback(&self) -> Result<usize> {
        if let Some(state) = MigrationState::load(&self.config.state_file).await {
            if !state.enable_rollback {
                return Err(crate::errors::Error::MigrationFailure(format!(
                    "run {} was started with rollback disabled (--no-rollback)",
                    state.run_id
                )));
            }
        }

        let ids = self.store.frozen_expense_ids().await?;
        let mut deleted = 0;
        for chunk in ids.chunks(100) {
            self.store.delete_frozen_by_expense_ids(chunk).await?;
            deleted += chunk.len();
        }
        MigrationState::remove(&self.config.state_file).await?;
        info!("migrator: rollback removed frozen rates for {} expenses", deleted);
        Ok(deleted)
    }

    /// Returns the current on-disk state, if a run has ever started.
    pub async fn status(&self) -> Option<MigrationState> {
        MigrationState::load(&self.config.state_file).await
    }
}

impl MigrationState {
    pub fn is_running(&self) -> bool {
        matches!(self.status, MigrationStatus::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate};
    use fxledger_market_data::{MarketDataError, RateLimit};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use crate::fx::model::{DailyRate, NearestRate};

    struct StubProvider;

    #[async_trait]
    impl RateProvider for StubProvider {
        fn id(&self) -> &'static str {
            "STUB"
        }
        fn rate_limit(&self) -> RateLimit {
            RateLimit::default()
        }
        async fn get_latest_rates(
            &self,
            _base: &str,
            targets: &[String],
        ) -> std::result::Result<HashMap<String, Decimal>, MarketDataError> {
            Ok(targets.iter().map(|t| (t.clone(), dec!(1.2))).collect())
        }
    }

    #[derive(Default)]
    struct StubStore {
        frozen_counts: StdMutex<HashMap<i64, i64>>,
        put_calls: StdMutex<Vec<(i64, Vec<RatePair>)>>,
    }

    #[async_trait]
    impl RateStoreTrait for StubStore {
        async fn put_daily(&self, _f: &str, _t: &str, _r: Decimal, _d: NaiveDate) -> Result<()> {
            Ok(())
        }
        async fn clear_all_daily(&self) -> Result<()> {
            Ok(())
        }
        async fn batch_put_daily(&self, _p: &[RatePair], _ts: DateTime<Utc>) -> Result<()> {
            Ok(())
        }
        async fn list_currencies(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn latest_daily_update(&self) -> Result<Option<NaiveDate>> {
            Ok(None)
        }
        async fn find_daily(
            &self,
            _f: &str,
            _t: &str,
            _w: chrono::Duration,
        ) -> Result<Option<DailyRate>> {
            Ok(None)
        }
        async fn find_nearest_daily(
            &self,
            _f: &str,
            _t: &str,
            _d: NaiveDate,
            _w: i64,
        ) -> Result<Option<NearestRate>> {
            Ok(None)
        }
        async fn put_frozen(&self, expense_id: i64, pairs: &[RatePair]) -> Result<()> {
            self.put_calls
                .lock()
                .unwrap()
                .push((expense_id, pairs.to_vec()));
            Ok(())
        }
        async fn find_frozen(&self, _e: i64, _f: &str, _t: &str) -> Result<Option<Decimal>> {
            Ok(None)
        }
        async fn count_frozen(&self, expense_id: i64) -> Result<i64> {
            Ok(*self.frozen_counts.lock().unwrap().get(&expense_id).unwrap_or(&0))
        }
        async fn find_any_daily(&self, _f: &str, _t: &str) -> Result<Option<DailyRate>> {
            Ok(None)
        }
        async fn delete_frozen_by_expense_ids(&self, _e: &[i64]) -> Result<()> {
            Ok(())
        }
        async fn frozen_expense_ids(&self) -> Result<Vec<i64>> {
            Ok(vec![])
        }
    }

    struct StubExpenses {
        expenses: Vec<Expense>,
    }

    #[async_trait]
    impl ExpenseSource for StubExpenses {
        async fn count(&self) -> Result<i64> {
            Ok(self.expenses.len() as i64)
        }
        async fn next_batch(&self, after_id: i64, limit: i64) -> Result<Vec<Expense>> {
            Ok(self
                .expenses
                .iter()
                .filter(|e| e.id > after_id)
                .take(limit as usize)
                .cloned()
                .collect())
        }
        async fn find(&self, id: i64) -> Result<Option<Expense>> {
            Ok(self.expenses.iter().find(|e| e.id == id).cloned())
        }
    }

    fn expense(id: i64) -> Expense {
        Expense {
            id,
            amount: dec!(50),
            currency: "USD".to_string(),
            transaction_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            description: "test".to_string(),
            legacy_conversion_rate: None,
        }
    }

    #[tokio::test]
    async fn test_run_migrates_every_expense_and_completes() {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("state.json");

        let expenses = Arc::new(StubExpenses {
            expenses: vec![expense(1), expense(2), expense(3)],
        });
        let store = Arc::new(StubStore::default());
        let migrator = Migrator::new(
            expenses,
            store.clone(),
            Arc::new(StubProvider),
            Arc::new(Cache::new()),
            CurrencySet::new(vec!["USD".to_string()], "EUR"),
            MigratorConfig {
                state_file: state_file.clone(),
                progress_report_interval: 1,
                ..Default::default()
            },
        );

        let summary = migrator.run().await.unwrap();
        assert_eq!(summary.state.status, MigrationStatus::Completed);
        assert_eq!(summary.state.migrated_count, 3);
        assert_eq!(store.put_calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_already_frozen_expenses_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("state.json");

        let expenses = Arc::new(StubExpenses {
            expenses: vec![expense(1)],
        });
        let store = Arc::new(StubStore::default());
        store.frozen_counts.lock().unwrap().insert(1, 2);

        let migrator = Migrator::new(
            expenses,
            store.clone(),
            Arc::new(StubProvider),
            Arc::new(Cache::new()),
            CurrencySet::new(vec!["USD".to_string()], "EUR"),
            MigratorConfig {
                state_file,
                ..Default::default()
            },
        );

        let summary = migrator.run().await.unwrap();
        assert_eq!(summary.state.skipped_count, 1);
        assert_eq!(summary.state.migrated_count, 0);
    }

    #[tokio::test]
    async fn test_resumes_from_persisted_state() {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("state.json");

        let mut prior = MigrationState::new("run-x".to_string(), 3, 50, 3, Utc::now());
        prior.record_migrated(1);
        prior.save(&state_file).await.unwrap();

        let expenses = Arc::new(StubExpenses {
            expenses: vec![expense(1), expense(2), expense(3)],
        });
        let store = Arc::new(StubStore::default());
        let migrator = Migrator::new(
            expenses,
            store.clone(),
            Arc::new(StubProvider),
            Arc::new(Cache::new()),
            CurrencySet::new(vec!["USD".to_string()], "EUR"),
            MigratorConfig {
                state_file,
                ..Default::default()
            },
        );

        let summary = migrator.run().await.unwrap();
        // Expense 1 already accounted for by the prior run; only 2 and 3 are processed now.
        assert_eq!(summary.state.migrated_count, 1 + 2);
        assert_eq!(summary.state.status, MigrationStatus::Completed);
    }

    #[tokio::test]
    async fn test_rollback_refuses_when_disabled_for_run() {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("state.json");

        let expenses = Arc::new(StubExpenses {
            expenses: vec![expense(1)],
        });
        let store = Arc::new(StubStore::default());
        let migrator = Migrator::new(
            expenses,
            store.clone(),
            Arc::new(StubProvider),
            Arc::new(Cache::new()),
            CurrencySet::new(vec!["USD".to_string()], "EUR"),
            MigratorConfig {
                state_file: state_file.clone(),
                enable_rollback: false,
                ..Default::default()
            },
        );

        migrator.run().await.unwrap();
        assert!(migrator.rollback().await.is_err());
    }

    #[tokio::test]
    async fn test_rollback_allowed_when_enabled_for_run() {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("state.json");

        let expenses = Arc::new(StubExpenses {
            expenses: vec![expense(1)],
        });
        let store = Arc::new(StubStore::default());
        let migrator = Migrator::new(
            expenses,
            store.clone(),
            Arc::new(StubProvider),
            Arc::new(Cache::new()),
            CurrencySet::new(vec!["USD".to_string()], "EUR"),
            MigratorConfig {
                state_file: state_file.clone(),
                enable_rollback: true,
                ..Default::default()
            },
        );

        migrator.run().await.unwrap();
        assert!(migrator.rollback().await.is_ok());
    }

    #[tokio::test]
    async fn test_cancellation_flag_pauses_run_at_next_batch_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("state.json");

        let expenses = Arc::new(StubExpenses {
            expenses: vec![expense(1), expense(2), expense(3)],
        });
        let store = Arc::new(StubStore::default());
        let migrator = Migrator::new(
            expenses,
            store.clone(),
            Arc::new(StubProvider),
            Arc::new(Cache::new()),
            CurrencySet::new(vec!["USD".to_string()], "EUR"),
            MigratorConfig {
                state_file,
                batch_size: 1,
                progress_report_interval: 1,
                ..Default::default()
            },
        );

        // Setting the flag before the first batch even runs pauses
        // immediately after it, since the check happens at the batch
        // boundary rather than inside `process_expense`.
        migrator.cancellation_flag().store(true, Ordering::SeqCst);

        let summary = migrator.run().await.unwrap();
        assert_eq!(summary.state.status, MigrationStatus::Paused);
        assert!(!summary.state.is_running());
        assert!(summary.state.migrated_count < 3);
    }
}
