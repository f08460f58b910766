//! CLI entry point for the Backfill Migrator: freezes a plausible rate set
//! for every pre-existing expense that was created before this system
//! existed and therefore has no frozen rates.

mod config;

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use fxledger_core::fx::Cache;
use fxledger_core::migrator::{Migrator, MigratorConfig};
use fxledger_market_data::HttpRateProvider;
use fxledger_storage_sqlite::expenses::SqliteExpenseRepository;
use fxledger_storage_sqlite::fx::SqliteRateStore;
use fxledger_storage_sqlite::{create_pool, run_migrations};

use config::Config;

#[derive(Parser)]
#[command(name = "fxledger-migrator", about = "Backfill migrator for historical expense rates")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run (or resume) a migration pass over expenses lacking frozen rates.
    Migrate {
        #[arg(long, default_value_t = 50)]
        batch_size: i64,
        #[arg(long, default_value_t = 3)]
        max_retries: u32,
        /// Mark this run as ineligible for `rollback` afterwards.
        #[arg(long, default_value_t = false)]
        no_rollback: bool,
    },
    /// Delete every frozen rate produced by any prior migration run.
    Rollback,
    /// Report the on-disk state of the most recent migration run.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let pool = create_pool(&config.core.database_path)?;
    run_migrations(&pool)?;
    let writer = fxledger_storage_sqlite::db::write_actor::spawn_writer((*pool).clone());

    let rate_store = Arc::new(SqliteRateStore::new(pool.clone(), writer.clone()));
    let expenses = Arc::new(SqliteExpenseRepository::new(pool.clone(), writer));
    let cache = Arc::new(Cache::with_capacity(config.core.cache_capacity));
    let provider = Arc::new(HttpRateProvider::with_timeout(
        config.core.provider_endpoint_template.clone(),
        config.core.provider_timeout,
    ));

    let exit_code = match cli.command {
        Command::Migrate {
            batch_size,
            max_retries,
            no_rollback,
        } => {
            let migrator_config = MigratorConfig {
                batch_size,
                max_retries,
                retry_delay: Duration::from_secs(1),
                progress_report_interval: 100,
                state_file: config.state_file.clone(),
                log_file: Some(config.log_file.clone()),
                enable_rollback: !no_rollback,
                nearest_window_days: config.core.migration_nearest_window_days,
            };
            let migrator = Migrator::new(
                expenses,
                rate_store,
                provider,
                cache,
                config.core.currencies.clone(),
                migrator_config,
            );

            // Ctrl-C requests a pause at the next batch boundary rather than
            // an abrupt kill, so the run resumes cleanly on the next invocation.
            let cancel = migrator.cancellation_flag();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("migrator: Ctrl-C received, pausing at next batch boundary");
                    cancel.store(true, std::sync::atomic::Ordering::SeqCst);
                }
            });

            run_migrate(&migrator).await?
        }
        Command::Rollback => {
            let migrator_config = MigratorConfig {
                state_file: config.state_file.clone(),
                log_file: Some(config.log_file.clone()),
                ..Default::default()
            };
            let migrator = Migrator::new(
                expenses,
                rate_store,
                provider,
                cache,
                config.core.currencies.clone(),
                migrator_config,
            );
            run_rollback(&migrator).await?
        }
        Command::Status => {
            let migrator_config = MigratorConfig {
                state_file: config.state_file.clone(),
                ..Default::default()
            };
            let migrator = Migrator::new(
                expenses,
                rate_store,
                provider,
                cache,
                config.core.currencies.clone(),
                migrator_config,
            );
            run_status(&migrator).await
        }
    };

    std::process::exit(exit_code);
}

async fn run_migrate(migrator: &Migrator) -> anyhow::Result<i32> {
    let summary = migrator.run().await?;
    println!(
        "status={:?} migrated={} skipped={} errors={}",
        summary.state.status,
        summary.state.migrated_count,
        summary.state.skipped_count,
        summary.state.errors.len()
    );
    for err in &summary.state.errors {
        eprintln!("expense {}: {}", err.expense_id, err.message);
    }
    Ok(match summary.state.status {
        fxledger_core::migrator::MigrationStatus::Completed
        | fxledger_core::migrator::MigrationStatus::Paused => 0,
        _ => 1,
    })
}

async fn run_rollback(migrator: &Migrator) -> anyhow::Result<i32> {
    let deleted = migrator.rollback().await?;
    println!("rolled back frozen rates for {} expenses", deleted);
    Ok(0)
}

async fn run_status(migrator: &Migrator) -> i32 {
    match migrator.status().await {
        Some(state) => {
            println!(
                "status={:?} processed={}/{} migrated={} skipped={} errors={} last_expense_id={}",
                state.status,
                state.processed_count,
                state.total_expenses,
                state.migrated_count,
                state.skipped_count,
                state.errors.len(),
                state.last_processed_expense_id
            );
            if state.is_running() {
                println!(
                    "warning: status is still 'running' — either another `migrate` is in \
                     progress, or the last run crashed mid-batch and can be resumed"
                );
            }
            0
        }
        None => {
            println!("no migration has been run yet");
            0
        }
    }
}
