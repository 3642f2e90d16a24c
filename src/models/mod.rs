use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// One kline sample as consumed by the envelope: open time plus high/low/close
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Kline {
    /// Reject NaN, infinite or negative prices
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("high", self.high), ("low", self.low), ("close", self.close)] {
            validate_price(name, value)?;
        }
        Ok(())
    }
}

/// Check a single price value is finite and non-negative
pub fn validate_price(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::InvalidInput(format!("{} price {} is not a valid price", name, value)));
    }
    Ok(())
}

/// Ordered kline history for one (symbol, interval)
///
/// Never empty, timestamps strictly increasing. Append-only while streaming,
/// replaced wholesale on a batch refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSeries {
    samples: Vec<Kline>,
}

impl PriceSeries {
    pub fn new(samples: Vec<Kline>) -> Result<Self> {
        if samples.is_empty() {
            return Err(Error::InvalidInput("price series is empty".to_string()));
        }

        for sample in &samples {
            sample.validate()?;
        }

        for pair in samples.windows(2) {
            if pair[1].open_time <= pair[0].open_time {
                return Err(Error::InvalidInput(format!(
                    "kline timestamps not strictly increasing: {} then {}",
                    pair[0].open_time, pair[1].open_time
                )));
            }
        }

        Ok(Self { samples })
    }

    /// Append a newer sample
    pub fn push(&mut self, sample: Kline) -> Result<()> {
        sample.validate()?;

        let last = self.last();
        if sample.open_time <= last.open_time {
            return Err(Error::InvalidInput(format!(
                "kline at {} is not newer than {}",
                sample.open_time, last.open_time
            )));
        }

        self.samples.push(sample);
        Ok(())
    }

    /// Replace the newest sample with a fresher view of the same kline
    pub fn update_last(&mut self, sample: Kline) -> Result<()> {
        sample.validate()?;

        let last = self.samples.len() - 1;
        if sample.open_time != self.samples[last].open_time {
            return Err(Error::InvalidInput(format!(
                "kline at {} does not update the kline at {}",
                sample.open_time, self.samples[last].open_time
            )));
        }

        self.samples[last] = sample;
        Ok(())
    }

    pub fn samples(&self) -> &[Kline] {
        &self.samples
    }

    pub fn closes(&self) -> Vec<f64> {
        self.samples.iter().map(|k| k.close).collect()
    }

    pub fn last(&self) -> &Kline {
        // Non-empty by construction
        &self.samples[self.samples.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Acknowledgement returned by the order-execution collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderAck {
    pub order_id: String,
    pub client_order_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub timestamp: DateTime<Utc>,
}
