use super::PriceCache;
use crate::models::{Kline, PriceSeries};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Source of kline history (an exchange, a replay file, a test double)
///
/// Implementations bound their own blocking with a timeout and report
/// `Network` / `RateLimited` for failures worth retrying.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Up to `limit` most recent klines, oldest first
    async fn fetch_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Kline>>;
}

/// Price feed fronted by the per-symbol history cache
#[derive(Clone)]
pub struct PriceFeedManager {
    feed: Arc<dyn PriceFeed>,
    cache: PriceCache,
}

impl PriceFeedManager {
    pub fn new(feed: Arc<dyn PriceFeed>, cache: PriceCache) -> Self {
        Self { feed, cache }
    }

    /// History for a key, served from cache when present
    pub async fn historical(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Arc<PriceSeries>> {
        if let Some(series) = self.cache.get(symbol, interval) {
            tracing::debug!(symbol = %symbol, interval = %interval, "Kline history cache hit");
            return Ok(series);
        }

        self.refresh(symbol, interval, limit).await
    }

    /// Fetch fresh history and replace the cache entry
    ///
    /// The cache is only written after the fetch and validation both succeed, so
    /// a failure leaves any previous entry untouched.
    pub async fn refresh(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Arc<PriceSeries>> {
        let klines = self.feed.fetch_klines(symbol, interval, limit).await?;
        let series = PriceSeries::new(klines)?;

        tracing::info!(
            symbol = %symbol,
            interval = %interval,
            klines = series.len(),
            "Fetched kline history"
        );

        Ok(self.cache.put(symbol, interval, series))
    }

    /// Most recent kline, bypassing the cache
    pub async fn latest(&self, symbol: &str, interval: &str) -> Result<Kline> {
        let klines = self.feed.fetch_klines(symbol, interval, 1).await?;

        let kline = klines
            .last()
            .copied()
            .ok_or_else(|| Error::Network(format!("feed returned no klines for {}", symbol)))?;
        kline.validate()?;

        Ok(kline)
    }

    pub fn cache(&self) -> &PriceCache {
        &self.cache
    }
}
