use std::path::PathBuf;

use fxledger_core::config::CoreConfig;

/// Migrator-specific settings layered on top of the shared [`CoreConfig`],
/// following the same `Config::from_env()` convention as the server binary.
pub struct Config {
    pub core: CoreConfig,
    pub state_file: PathBuf,
    pub log_file: PathBuf,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let core = CoreConfig::from_env()?;

        let state_file = std::env::var("FXLEDGER_MIGRATION_STATE_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("migration-state.json"));

        let log_file = std::env::var("FXLEDGER_MIGRATION_LOG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("migration.log"));

        Ok(Self {
            core,
            state_file,
            log_file,
        })
    }
}
