use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use fxledger_core::fx::currencies::{currency_metadata, FALLBACK_CURRENCY_CODES};
use fxledger_core::fx::{CacheKeyType, RateStoreTrait};

use crate::{error::ApiResult, main_lib::AppState};

#[derive(Debug, Deserialize)]
struct RatePairQuery {
    from: String,
    to: String,
}

#[derive(Debug, Serialize)]
struct ExchangeRateResponse {
    from: String,
    to: String,
    rate: Decimal,
}

async fn get_exchange_rate(
    State(state): State<Arc<AppState>>,
    Query(q): Query<RatePairQuery>,
) -> ApiResult<Json<ExchangeRateResponse>> {
    let from = q.from.to_uppercase();
    let to = q.to.to_uppercase();
    let result = state
        .conversion_engine
        .convert(Decimal::ONE, &from, &to, None)
        .await?;
    Ok(Json(ExchangeRateResponse {
        from,
        to,
        rate: result.rate,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConvertCurrencyRequest {
    amount: Decimal,
    from: String,
    to: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConvertCurrencyResponse {
    original_amount: Decimal,
    from: String,
    to: String,
    converted_amount: Decimal,
    rate: Decimal,
}

async fn convert_currency(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ConvertCurrencyRequest>,
) -> ApiResult<Json<ConvertCurrencyResponse>> {
    if body.amount <= Decimal::ZERO {
        return Err(crate::error::ApiError::BadRequest(
            "amount must be greater than zero".to_string(),
        ));
    }
    let from = body.from.to_uppercase();
    let to = body.to.to_uppercase();
    let result = state
        .conversion_engine
        .convert(body.amount, &from, &to, None)
        .await?;
    Ok(Json(ConvertCurrencyResponse {
        original_amount: body.amount,
        from,
        to,
        converted_amount: result.converted_amount,
        rate: result.rate,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateDailyRatesRequest {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateDailyRatesResponse {
    success: bool,
    skipped: bool,
    updated: Option<usize>,
    error: Option<String>,
}

async fn update_daily_exchange_rates(
    State(state): State<Arc<AppState>>,
    body: Option<Json<UpdateDailyRatesRequest>>,
) -> Json<UpdateDailyRatesResponse> {
    let force = body.map(|b| b.0.force).unwrap_or(false);
    match state.refresh_loop.run(force).await {
        Ok(outcome) => Json(UpdateDailyRatesResponse {
            success: true,
            skipped: outcome.skipped,
            updated: Some(outcome.updated),
            error: None,
        }),
        Err(err) => Json(UpdateDailyRatesResponse {
            success: false,
            skipped: false,
            updated: None,
            error: Some(err.to_string()),
        }),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ForceUpdateResponse {
    success: bool,
    updated: usize,
    timestamp: chrono::DateTime<Utc>,
}

async fn force_update_exchange_rates(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ForceUpdateResponse>> {
    let outcome = state.refresh_loop.run(true).await?;
    Ok(Json(ForceUpdateResponse {
        success: true,
        updated: outcome.updated,
        timestamp: Utc::now(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LastUpdateResponse {
    success: bool,
    last_update_date: Option<chrono::NaiveDate>,
    debug_info: Option<String>,
}

async fn get_last_exchange_rate_update(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<LastUpdateResponse>> {
    let last = state.rate_store.latest_daily_update().await?;

    // If the most recent DailyRate day is within 3 hours of "today" by wall
    // clock, report today's date rather than the stored one: storage dates
    // are UTC-naive and can read as yesterday right after midnight in a
    // client's local zone, which looked like a stuck refresh in practice.
    let now = Utc::now();
    let today = now.date_naive();
    let substituted = match last {
        Some(day) if day != today && (today - day).num_days() <= 1 => {
            let hours_into_day = now.time().num_seconds_from_midnight() / 3600;
            if hours_into_day < 3 {
                Some(today)
            } else {
                Some(day)
            }
        }
        other => other,
    };

    Ok(Json(LastUpdateResponse {
        success: true,
        last_update_date: substituted,
        debug_info: if substituted != last {
            Some(format!(
                "substituted wall-clock date {:?} for stored {:?}",
                substituted, last
            ))
        } else {
            None
        },
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshStatusResponse {
    healthy: bool,
    needs_update: bool,
    last_update: Option<chrono::NaiveDate>,
    error: Option<String>,
}

/// Grace horizon within which a missing-today DailyRate is still considered
/// healthy; matches the Refresh Loop's "at least once per UTC day" contract
/// plus slack for a process that hasn't ticked yet.
const REFRESH_GRACE_DAYS: i64 = 1;

async fn get_refresh_status(State(state): State<Arc<AppState>>) -> Json<RefreshStatusResponse> {
    match state.rate_store.latest_daily_update().await {
        Ok(last) => {
            let today = Utc::now().date_naive();
            let needs_update = match last {
                Some(day) => (today - day).num_days() > REFRESH_GRACE_DAYS,
                None => true,
            };
            Json(RefreshStatusResponse {
                healthy: !needs_update,
                needs_update,
                last_update: last,
                error: None,
            })
        }
        Err(err) => Json(RefreshStatusResponse {
            healthy: false,
            needs_update: true,
            last_update: None,
            error: Some(err.to_string()),
        }),
    }
}

#[derive(Debug, Serialize)]
struct CurrencyInfo {
    code: String,
    name: String,
    symbol: String,
}

async fn get_available_currencies(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<CurrencyInfo>>> {
    let mut codes = state.rate_store.list_currencies().await?;
    if codes.is_empty() {
        codes = FALLBACK_CURRENCY_CODES.iter().map(|c| c.to_string()).collect();
    }

    let currencies = codes
        .into_iter()
        .map(|code| {
            let (name, symbol) = currency_metadata(&code);
            let name = if name.is_empty() { code.clone() } else { name.to_string() };
            let symbol = if symbol.is_empty() { code.clone() } else { symbol.to_string() };
            CurrencyInfo { code, name, symbol }
        })
        .collect();

    Ok(Json(currencies))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheMetricsResponse {
    entries: usize,
    by_type: std::collections::HashMap<String, usize>,
    hit_rate: f64,
    memory_estimate: usize,
    hit_count: u64,
    miss_count: u64,
    warming_status: &'static str,
}

async fn get_cache_metrics(State(state): State<Arc<AppState>>) -> Json<CacheMetricsResponse> {
    let metrics = state.cache.metrics();
    let by_type = state
        .cache
        .size_by_type()
        .into_iter()
        .map(|(k, v)| (format!("{:?}", k), v))
        .collect();
    let total = metrics.hits + metrics.misses;
    let hit_rate = if total == 0 {
        0.0
    } else {
        metrics.hits as f64 / total as f64
    };

    Json(CacheMetricsResponse {
        entries: metrics.size,
        by_type,
        hit_rate,
        memory_estimate: state.cache.memory_estimate_bytes(),
        hit_count: metrics.hits,
        miss_count: metrics.misses,
        warming_status: if state.cache.is_warming() {
            "warming"
        } else if metrics.size > 0 {
            "warm"
        } else {
            "cold"
        },
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvalidateCacheRequest {
    currency: Option<String>,
    #[serde(default)]
    clear_all: bool,
}

async fn invalidate_cache(
    State(state): State<Arc<AppState>>,
    Json(body): Json<InvalidateCacheRequest>,
) -> Json<serde_json::Value> {
    // No per-cache-family granularity requested here: a currency code can
    // legitimately appear in any of the six key families, so invalidation by
    // currency sweeps all of them.
    if body.clear_all {
        state.cache.invalidate(None, None);
        return Json(serde_json::json!({ "success": true }));
    }
    state.cache.invalidate(body.currency.as_deref(), None);
    Json(serde_json::json!({ "success": true, "currency": body.currency }))
}

#[derive(Debug, Deserialize)]
struct WarmCacheEntry {
    from: String,
    to: String,
    rate: Decimal,
}

async fn warm_cache(
    State(state): State<Arc<AppState>>,
    Json(entries): Json<Vec<WarmCacheEntry>>,
) -> Json<serde_json::Value> {
    let mut warmed = 0usize;
    for entry in entries {
        let key = format!("{}:{}", entry.from.to_uppercase(), entry.to.to_uppercase());
        if state
            .cache
            .set(CacheKeyType::CurrentRate, &key, &entry.rate)
            .is_ok()
        {
            warmed += 1;
        }
    }
    Json(serde_json::json!({ "success": true, "warmed": warmed }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/fx/rate", get(get_exchange_rate))
        .route("/fx/convert", post(convert_currency))
        .route("/fx/daily-update", post(update_daily_exchange_rates))
        .route("/fx/force-update", post(force_update_exchange_rates))
        .route("/fx/last-update", get(get_last_exchange_rate_update))
        .route("/fx/status", get(get_refresh_status))
        .route("/fx/currencies", get(get_available_currencies))
        .route("/fx/cache/metrics", get(get_cache_metrics))
        .route("/fx/cache/invalidate", post(invalidate_cache))
        .route("/fx/cache/warm", post(warm_cache))
}
