use std::sync::Arc;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use fxledger_core::config::CoreConfig;
use fxledger_core::events::DomainEventSink;
use fxledger_core::fx::{Cache, CaptureEngine, ConversionEngine, CurrencySet, DailyRefreshLoop};
use fxledger_market_data::{HttpRateProvider, RateProvider};
use fxledger_storage_sqlite::expenses::SqliteExpenseRepository;
use fxledger_storage_sqlite::fx::SqliteRateStore;
use fxledger_storage_sqlite::{create_pool, run_migrations};

use crate::domain_events::WebDomainEventSink;

pub struct AppState {
    pub core_config: CoreConfig,
    pub currencies: CurrencySet,
    pub cache: Arc<Cache>,
    pub provider: Arc<dyn RateProvider>,
    pub rate_store: Arc<SqliteRateStore>,
    pub expenses: Arc<SqliteExpenseRepository>,
    pub capture_engine: Arc<CaptureEngine>,
    pub conversion_engine: Arc<ConversionEngine>,
    pub refresh_loop: Arc<DailyRefreshLoop>,
    pub event_sink: Arc<WebDomainEventSink>,
}

/// Toggles between human-readable and JSON log formatting via
/// `FXLEDGER_LOG_FORMAT` (the teacher's `WF_LOG_FORMAT` convention, renamed
/// for this product).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json_format = std::env::var("FXLEDGER_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

pub async fn build_state() -> anyhow::Result<Arc<AppState>> {
    let core_config = CoreConfig::from_env()?;

    let pool = create_pool(&core_config.database_path)?;
    run_migrations(&pool)?;
    let writer = fxledger_storage_sqlite::db::write_actor::spawn_writer((*pool).clone());

    let rate_store = Arc::new(SqliteRateStore::new(pool.clone(), writer.clone()));
    let expenses = Arc::new(SqliteExpenseRepository::new(pool.clone(), writer));
    let cache = Arc::new(Cache::with_capacity(core_config.cache_capacity));
    let provider: Arc<dyn RateProvider> = Arc::new(HttpRateProvider::with_timeout(
        core_config.provider_endpoint_template.clone(),
        core_config.provider_timeout,
    ));

    let capture_engine = Arc::new(CaptureEngine::new(
        rate_store.clone(),
        provider.clone(),
        cache.clone(),
        core_config.currencies.clone(),
    ));
    let conversion_engine = Arc::new(ConversionEngine::with_interpolation_window(
        rate_store.clone(),
        provider.clone(),
        cache.clone(),
        core_config.currencies.clone(),
        core_config.interpolation_window_days,
    ));
    let refresh_loop = Arc::new(DailyRefreshLoop::new(
        rate_store.clone(),
        provider.clone(),
        core_config.currencies.clone(),
        core_config.refresh_bases.clone(),
    ));

    let event_sink = Arc::new(WebDomainEventSink::new());
    event_sink.start_worker(capture_engine.clone());

    let currencies = core_config.currencies.clone();

    Ok(Arc::new(AppState {
        core_config,
        currencies,
        cache,
        provider,
        rate_store,
        expenses,
        capture_engine,
        conversion_engine,
        refresh_loop,
        event_sink,
    }))
}

/// Type-erased accessor so handlers can emit events without naming
/// `WebDomainEventSink` directly.
impl AppState {
    pub fn event_sink(&self) -> Arc<dyn DomainEventSink> {
        self.event_sink.clone()
    }
}
