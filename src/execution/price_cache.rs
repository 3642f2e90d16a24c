use crate::models::PriceSeries;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

type CacheKey = (String, String);

/// Thread-safe in-memory cache of kline history
///
/// One entry per (symbol, interval). Entries are replaced on refresh, never merged.
/// No eviction: a session only ever touches a handful of keys.
#[derive(Clone, Default)]
pub struct PriceCache {
    data: Arc<RwLock<HashMap<CacheKey, Arc<PriceSeries>>>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached series for a key; repeated calls return the same snapshot
    pub fn get(&self, symbol: &str, interval: &str) -> Option<Arc<PriceSeries>> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.get(&key(symbol, interval)).cloned()
    }

    /// Store a complete series, overwriting any previous entry
    pub fn put(&self, symbol: &str, interval: &str, series: PriceSeries) -> Arc<PriceSeries> {
        let series = Arc::new(series);
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.insert(key(symbol, interval), series.clone());
        series
    }

    pub fn contains(&self, symbol: &str, interval: &str) -> bool {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.contains_key(&key(symbol, interval))
    }

    /// Number of cached keys
    pub fn len(&self) -> usize {
        self.data.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the entry for a key
    pub fn remove(&self, symbol: &str, interval: &str) -> Option<Arc<PriceSeries>> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.remove(&key(symbol, interval))
    }

    /// Clear all data
    pub fn clear(&self) {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn key(symbol: &str, interval: &str) -> CacheKey {
    (symbol.to_string(), interval.to_string())
}
