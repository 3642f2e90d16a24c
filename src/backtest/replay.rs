use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::execution::PriceFeed;
use crate::models::Kline;
use crate::{Error, Result};

/// Price feed over a prepared kline sequence
///
/// The first `history_len` klines are "already closed" history. History requests
/// (`limit > 1`) return the tail of what has been revealed so far; each latest-kline
/// request (`limit == 1`) reveals one more kline. Runs out with `InvalidState` so a
/// replay ends instead of retrying forever.
pub struct ReplayFeed {
    symbol: String,
    klines: Vec<Kline>,
    revealed: Mutex<usize>,
}

impl ReplayFeed {
    pub fn new(symbol: impl Into<String>, klines: Vec<Kline>, history_len: usize) -> Self {
        let history_len = history_len.min(klines.len());
        Self {
            symbol: symbol.into(),
            klines,
            revealed: Mutex::new(history_len),
        }
    }

    /// Klines not yet streamed
    pub fn remaining(&self) -> usize {
        let revealed = *self.revealed.lock().unwrap_or_else(PoisonError::into_inner);
        self.klines.len() - revealed
    }
}

#[async_trait]
impl PriceFeed for ReplayFeed {
    async fn fetch_klines(&self, symbol: &str, _interval: &str, limit: u32) -> Result<Vec<Kline>> {
        if symbol != self.symbol {
            return Err(Error::Api(format!("replay has no data for {}", symbol)));
        }

        let mut revealed = self.revealed.lock().unwrap_or_else(PoisonError::into_inner);

        if limit <= 1 {
            if *revealed >= self.klines.len() {
                return Err(Error::InvalidState("replay exhausted".to_string()));
            }
            *revealed += 1;
            return Ok(vec![self.klines[*revealed - 1]]);
        }

        let start = revealed.saturating_sub(limit as usize);
        Ok(self.klines[start..*revealed].to_vec())
    }
}
