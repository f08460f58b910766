//! In-process, TTL-bounded cache for rates and conversion results.
//!
//! Modeled on the market-data provider registry's circuit breaker: a
//! `Mutex<HashMap<_, _>>` guarding per-key state, with poison recovery on
//! lock acquisition rather than propagating a panic. Single-flight
//! deduplication of concurrent misses is layered on top with a second map of
//! per-key async locks, since the circuit breaker idiom itself has no
//! equivalent (it never awaits while holding its mutex).

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::warn;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::errors::{Error, Result};
use crate::fx::fx_errors::FxError;

/// The six cache key families, each with its own TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKeyType {
    CurrentRate,
    HistoricalRate,
    ConversionCurrent,
    ConversionHistorical,
    ExpenseRatesBundle,
    ApiResponse,
}

impl CacheKeyType {
    pub fn ttl(self) -> Duration {
        match self {
            CacheKeyType::CurrentRate => Duration::from_secs(60 * 60),
            CacheKeyType::HistoricalRate => Duration::from_secs(24 * 60 * 60),
            CacheKeyType::ConversionCurrent => Duration::from_secs(30 * 60),
            CacheKeyType::ConversionHistorical => Duration::from_secs(24 * 60 * 60),
            CacheKeyType::ExpenseRatesBundle => Duration::from_secs(24 * 60 * 60),
            CacheKeyType::ApiResponse => Duration::from_secs(15 * 60),
        }
    }
}

struct CacheEntry {
    value: Value,
    key_type: CacheKeyType,
    inserted_at: Instant,
    last_accessed: Instant,
    access_count: u64,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.key_type.ttl()
    }
}

/// Point-in-time snapshot of cache health, emitted by the periodic
/// housekeeping task.
#[derive(Debug, Clone)]
pub struct CacheMetrics {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub oldest_entry_age: Option<Duration>,
    pub newest_entry_age: Option<Duration>,
}

const DEFAULT_CAPACITY: usize = 2_000;

pub struct Cache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

fn cache_key(key_type: CacheKeyType, key: &str) -> String {
    format!("{:?}:{}", key_type, key)
}

impl Cache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            warn!("cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_inflight(&self) -> MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
        self.inflight.lock().unwrap_or_else(|poisoned| {
            warn!("cache inflight mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Returns the cached value for `key` if present and unexpired,
    /// deserializing it into `V`. Expired entries are removed on read.
    pub fn get<V: DeserializeOwned>(&self, key_type: CacheKeyType, key: &str) -> Option<V> {
        let full_key = cache_key(key_type, key);
        let mut entries = self.lock_entries();

        let expired = match entries.get(&full_key) {
            Some(entry) => entry.is_expired(),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            entries.remove(&full_key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let entry = entries.get_mut(&full_key).expect("checked above");
        entry.access_count += 1;
        entry.last_accessed = Instant::now();
        self.hits.fetch_add(1, Ordering::Relaxed);
        serde_json::from_value(entry.value.clone()).ok()
    }

    /// Inserts `value` under `key`, evicting the least-recently-accessed
    /// entry if the cache is at capacity.
    pub fn set<V: Serialize>(&self, key_type: CacheKeyType, key: &str, value: &V) -> Result<()> {
        let json = serde_json::to_value(value)?;
        let full_key = cache_key(key_type, key);
        let mut entries = self.lock_entries();

        if entries.len() >= self.capacity && !entries.contains_key(&full_key) {
            if let Some(oldest_key) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest_key);
            }
        }

        let now = Instant::now();
        entries.insert(
            full_key,
            CacheEntry {
                value: json,
                key_type,
                inserted_at: now,
                last_accessed: now,
                access_count: 0,
            },
        );

        Ok(())
    }

    /// Removes cached entries. `pattern` matches by substring of the raw key
    /// (post key-type prefix); `key_type` narrows to one family. With both
    /// `None`, clears everything.
    pub fn invalidate(&self, pattern: Option<&str>, key_type: Option<CacheKeyType>) {
        let mut entries = self.lock_entries();

        if pattern.is_none() && key_type.is_none() {
            entries.clear();
            return;
        }

        entries.retain(|full_key, entry| {
            let type_matches = key_type.map(|t| t == entry.key_type).unwrap_or(true);
            let pattern_matches = pattern.map(|p| full_key.contains(p)).unwrap_or(true);
            !(type_matches && pattern_matches)
        });
    }

    /// Gets the cached value, or computes and stores it on miss. At most one
    /// `producer` runs concurrently per key; other callers for the same key
    /// await that single in-flight computation instead of duplicating it.
    pub async fn get_or_compute<V, F, Fut>(
        &self,
        key_type: CacheKeyType,
        key: &str,
        producer: F,
    ) -> Result<V>
    where
        V: Serialize + DeserializeOwned + Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(hit) = self.get::<V>(key_type, key) {
            return Ok(hit);
        }

        let key_lock = {
            let mut inflight = self.lock_inflight();
            inflight
                .entry(cache_key(key_type, key))
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };

        let _guard = key_lock.lock().await;

        // Re-check: another caller may have populated the entry while we
        // were waiting for the per-key lock.
        if let Some(hit) = self.get::<V>(key_type, key) {
            return Ok(hit);
        }

        let value = producer()
            .await
            .map_err(|e| Error::Fx(FxError::Cache(e.to_string())))?;
        self.set(key_type, key, &value)?;
        Ok(value)
    }

    /// Drops every entry whose TTL has elapsed. Intended to be run
    /// periodically by a housekeeping task, not on the hot path.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.lock_entries();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        before - entries.len()
    }

    pub fn metrics(&self) -> CacheMetrics {
        let entries = self.lock_entries();
        let oldest_entry_age = entries.values().map(|e| e.inserted_at.elapsed()).max();
        let newest_entry_age = entries.values().map(|e| e.inserted_at.elapsed()).min();

        CacheMetrics {
            size: entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            oldest_entry_age,
            newest_entry_age,
        }
    }

    /// Live entry count per key family, for the `getCacheMetrics` RPC's
    /// per-type breakdown.
    pub fn size_by_type(&self) -> HashMap<CacheKeyType, usize> {
        let entries = self.lock_entries();
        let mut counts = HashMap::new();
        for entry in entries.values() {
            *counts.entry(entry.key_type).or_insert(0usize) += 1;
        }
        counts
    }

    /// Whether a `get_or_compute` producer is currently in flight for any
    /// key. Surfaced to callers as a coarse "warming" indicator.
    pub fn is_warming(&self) -> bool {
        !self.lock_inflight().is_empty()
    }

    /// Rough byte-size estimate of cached values, for the `getCacheMetrics`
    /// RPC's `memoryEstimate` field. Not exact: sums each entry's
    /// serialized JSON length plus a fixed per-entry overhead.
    pub fn memory_estimate_bytes(&self) -> usize {
        const PER_ENTRY_OVERHEAD: usize = 96;
        let entries = self.lock_entries();
        entries
            .values()
            .map(|e| e.value.to_string().len() + PER_ENTRY_OVERHEAD)
            .sum()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get_roundtrip() {
        let cache = Cache::new();
        cache
            .set(CacheKeyType::CurrentRate, "USD:EUR", &"0.92".to_string())
            .unwrap();
        let hit: Option<String> = cache.get(CacheKeyType::CurrentRate, "USD:EUR");
        assert_eq!(hit, Some("0.92".to_string()));
    }

    #[test]
    fn test_miss_increments_counter() {
        let cache = Cache::new();
        let hit: Option<String> = cache.get(CacheKeyType::CurrentRate, "missing");
        assert!(hit.is_none());
        assert_eq!(cache.metrics().misses, 1);
    }

    #[test]
    fn test_invalidate_by_type() {
        let cache = Cache::new();
        cache
            .set(CacheKeyType::CurrentRate, "a", &1u32)
            .unwrap();
        cache
            .set(CacheKeyType::ApiResponse, "b", &2u32)
            .unwrap();
        cache.invalidate(None, Some(CacheKeyType::CurrentRate));
        assert!(cache.get::<u32>(CacheKeyType::CurrentRate, "a").is_none());
        assert!(cache.get::<u32>(CacheKeyType::ApiResponse, "b").is_some());
    }

    #[test]
    fn test_eviction_at_capacity() {
        let cache = Cache::with_capacity(2);
        cache.set(CacheKeyType::CurrentRate, "a", &1u32).unwrap();
        cache.set(CacheKeyType::CurrentRate, "b", &2u32).unwrap();
        // touch "b" so "a" becomes the least-recently-accessed entry
        let _: Option<u32> = cache.get(CacheKeyType::CurrentRate, "b");
        cache.set(CacheKeyType::CurrentRate, "c", &3u32).unwrap();
        assert!(cache.get::<u32>(CacheKeyType::CurrentRate, "a").is_none());
        assert!(cache.get::<u32>(CacheKeyType::CurrentRate, "c").is_some());
    }

    #[tokio::test]
    async fn test_get_or_compute_caches_result() {
        let cache = Cache::new();
        let calls = std::sync::atomic::AtomicU32::new(0);

        let first: u32 = cache
            .get_or_compute(CacheKeyType::CurrentRate, "USD:EUR", || async {
                calls.fetch_add(1, Ordering::Relaxed);
                Ok(42)
            })
            .await
            .unwrap();
        let second: u32 = cache
            .get_or_compute(CacheKeyType::CurrentRate, "USD:EUR", || async {
                calls.fetch_add(1, Ordering::Relaxed);
                Ok(43)
            })
            .await
            .unwrap();

        assert_eq!(first, 42);
        assert_eq!(second, 42);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
