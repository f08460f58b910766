//! Background scheduler for the Daily Refresh Loop.
//!
//! Runs `AppState::refresh_loop` on a fixed interval so the DailyRate table
//! stays populated without a caller ever hitting `updateDailyExchangeRates`.

use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{info, warn};

use crate::main_lib::AppState;

/// Delay before the first scheduled run, long enough for the server to
/// finish binding its listener.
const INITIAL_DELAY_SECS: u64 = 30;

/// Starts the background Daily Refresh Loop scheduler.
pub fn start_daily_refresh_scheduler(state: Arc<AppState>, refresh_interval: Duration) {
    tokio::spawn(async move {
        info!(
            interval_secs = refresh_interval.as_secs(),
            "daily refresh scheduler started"
        );

        tokio::time::sleep(Duration::from_secs(INITIAL_DELAY_SECS)).await;

        let mut ticker = interval(refresh_interval);

        loop {
            ticker.tick().await;
            run_scheduled_refresh(&state).await;
        }
    });
}

async fn run_scheduled_refresh(state: &Arc<AppState>) {
    match state.refresh_loop.run(false).await {
        Ok(outcome) if outcome.skipped => {
            info!("scheduled daily refresh skipped: already up to date");
        }
        Ok(outcome) => {
            info!(updated = outcome.updated, "scheduled daily refresh completed");
        }
        Err(err) => warn!(error = %err, "scheduled daily refresh failed"),
    }
}

/// Interval between cache housekeeping passes.
const CACHE_HOUSEKEEPER_INTERVAL_SECS: u64 = 120;

/// Starts the background cache housekeeper: purges expired entries and logs
/// a metrics snapshot every couple of minutes, off the hot path.
pub fn start_cache_housekeeper(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(CACHE_HOUSEKEEPER_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            let purged = state.cache.purge_expired();
            let metrics = state.cache.metrics();
            if purged > 0 {
                info!(purged, size = metrics.size, "cache housekeeper purged expired entries");
            } else {
                tracing::debug!(size = metrics.size, hits = metrics.hits, misses = metrics.misses, "cache housekeeper tick");
            }
        }
    });
}
