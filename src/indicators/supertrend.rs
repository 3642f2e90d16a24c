//! Volatility-adaptive trend envelope (SuperTrend style)
//!
//! `upper = mid + multiplier * ATR`, `lower = mid - multiplier * ATR` where `mid`
//! is the midpoint of the running close extremes. The trend line follows the lower
//! band while the close is above the upper band and the upper band otherwise.
//!
//! Two ways to get there: `EnvelopeCalculator::compute_batch` over a whole close
//! history, or `EnvelopeState::extend_one` one close at a time. Both share the
//! same arithmetic and produce bit-identical values for the same input.

use super::atr::{running_extremes, true_range, true_range_series};
use super::moving_average::{sma_series, RollingSma};
use crate::models::validate_price;
use crate::{Error, Result};

/// Band/trend values at one index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopePoint {
    pub upper: f64,
    pub lower: f64,
    pub trend: f64,
}

impl EnvelopePoint {
    fn from_parts(running_high: f64, running_low: f64, close: f64, atr: f64, multiplier: f64) -> Self {
        let mid = (running_high + running_low) / 2.0;
        let upper = mid + multiplier * atr;
        let lower = mid - multiplier * atr;
        let trend = if close > upper { lower } else { upper };

        Self { upper, lower, trend }
    }
}

/// Full envelope over a close history
///
/// Every vector is aligned with the input closes. `points[i]` is `None` until the
/// ATR window has filled (`i < period - 1`).
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeSeries {
    pub running_high: Vec<f64>,
    pub running_low: Vec<f64>,
    pub atr: Vec<Option<f64>>,
    pub points: Vec<Option<EnvelopePoint>>,
}

impl EnvelopeSeries {
    pub fn upper_band(&self) -> Vec<Option<f64>> {
        self.points.iter().map(|p| p.map(|p| p.upper)).collect()
    }

    pub fn lower_band(&self) -> Vec<Option<f64>> {
        self.points.iter().map(|p| p.map(|p| p.lower)).collect()
    }

    pub fn trend(&self) -> Vec<Option<f64>> {
        self.points.iter().map(|p| p.map(|p| p.trend)).collect()
    }

    /// Newest point, `None` while warming up
    pub fn latest(&self) -> Option<EnvelopePoint> {
        self.points.last().copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Envelope parameters, validated once at construction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeCalculator {
    period: usize,
    multiplier: f64,
}

impl EnvelopeCalculator {
    pub fn new(period: usize, multiplier: f64) -> Result<Self> {
        if period == 0 {
            return Err(Error::InvalidParameter("ATR period must be > 0".to_string()));
        }
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "ATR multiplier must be > 0, got {}",
                multiplier
            )));
        }

        Ok(Self { period, multiplier })
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Recompute the envelope over an entire close history
    pub fn compute_batch(&self, closes: &[f64]) -> Result<EnvelopeSeries> {
        if closes.is_empty() {
            return Err(Error::InvalidInput(
                "cannot compute envelope over an empty price series".to_string(),
            ));
        }
        for &close in closes {
            validate_price("close", close)?;
        }

        let (running_high, running_low) = running_extremes(closes);
        let true_ranges = true_range_series(closes, &running_high, &running_low);
        let atr = sma_series(&true_ranges, self.period);

        let points = atr
            .iter()
            .enumerate()
            .map(|(i, atr)| {
                atr.map(|atr| {
                    EnvelopePoint::from_parts(
                        running_high[i],
                        running_low[i],
                        closes[i],
                        atr,
                        self.multiplier,
                    )
                })
            })
            .collect();

        Ok(EnvelopeSeries {
            running_high,
            running_low,
            atr,
            points,
        })
    }

    /// Empty streaming state for these parameters
    pub fn state(&self) -> EnvelopeState {
        EnvelopeState {
            multiplier: self.multiplier,
            running_high: None,
            running_low: None,
            prev_close: None,
            atr: RollingSma::new(self.period),
            samples: 0,
            latest: None,
        }
    }

    /// Streaming state positioned after `closes`, ready for `extend_one`
    pub fn state_from(&self, closes: &[f64]) -> Result<EnvelopeState> {
        if closes.is_empty() {
            return Err(Error::InvalidInput(
                "cannot seed envelope from an empty price series".to_string(),
            ));
        }

        let mut state = self.state();
        for &close in closes {
            state.extend_one(close)?;
        }
        Ok(state)
    }
}

/// Running envelope state: last extremes, previous close and the trailing
/// `period` true ranges. Constant memory regardless of history length.
#[derive(Debug, Clone)]
pub struct EnvelopeState {
    multiplier: f64,
    running_high: Option<f64>,
    running_low: Option<f64>,
    prev_close: Option<f64>,
    atr: RollingSma,
    samples: usize,
    latest: Option<EnvelopePoint>,
}

impl EnvelopeState {
    /// Append one close and return the newest envelope point
    ///
    /// Returns `Ok(None)` while the ATR window is still filling. A rejected close
    /// leaves the state untouched.
    ///
    /// Costs O(period) per call: the ATR window is re-summed oldest to newest
    /// rather than updated with a running total, which keeps every value
    /// bit-identical to `compute_batch` over the same closes.
    pub fn extend_one(&mut self, close: f64) -> Result<Option<EnvelopePoint>> {
        validate_price("close", close)?;

        let high = self.running_high.map_or(close, |h| close.max(h));
        let low = self.running_low.map_or(close, |l| close.min(l));
        let prev_close = self.prev_close.unwrap_or(close);

        let tr = true_range(high, low, prev_close);
        let point = self
            .atr
            .push(tr)
            .map(|atr| EnvelopePoint::from_parts(high, low, close, atr, self.multiplier));

        self.running_high = Some(high);
        self.running_low = Some(low);
        self.prev_close = Some(close);
        self.samples += 1;
        self.latest = point;

        Ok(point)
    }

    /// Most recent point, `None` during warm-up
    pub fn latest(&self) -> Option<EnvelopePoint> {
        self.latest
    }

    pub fn running_high(&self) -> Option<f64> {
        self.running_high
    }

    pub fn running_low(&self) -> Option<f64> {
        self.running_low
    }

    /// Number of closes consumed so far
    pub fn samples(&self) -> usize {
        self.samples
    }
}
