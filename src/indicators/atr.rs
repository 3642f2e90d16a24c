//! Average True Range (ATR) over close-derived running extremes
//!
//! The envelope does not use exchange highs/lows. Instead it tracks a running
//! maximum and minimum of closes, seeded with the first close, and measures
//! True Range as the greatest of:
//! - Running High - Running Low
//! - Abs(Running High - Previous Close)
//! - Abs(Running Low - Previous Close)
//!
//! Index 0 uses its own close as the previous close. ATR is a simple moving
//! average of True Range and has no value before `period - 1`.

use super::moving_average::sma_series;

/// True Range of a single step
pub fn true_range(running_high: f64, running_low: f64, prev_close: f64) -> f64 {
    (running_high - running_low)
        .max((running_high - prev_close).abs())
        .max((running_low - prev_close).abs())
}

/// Running max/min of closes, each seeded with `closes[0]`
pub fn running_extremes(closes: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut highs = Vec::with_capacity(closes.len());
    let mut lows = Vec::with_capacity(closes.len());

    for (i, &close) in closes.iter().enumerate() {
        if i == 0 {
            highs.push(close);
            lows.push(close);
        } else {
            highs.push(close.max(highs[i - 1]));
            lows.push(close.min(lows[i - 1]));
        }
    }

    (highs, lows)
}

/// True Range at every index
pub fn true_range_series(closes: &[f64], highs: &[f64], lows: &[f64]) -> Vec<f64> {
    (0..closes.len())
        .map(|i| {
            let prev_close = if i == 0 { closes[0] } else { closes[i - 1] };
            true_range(highs[i], lows[i], prev_close)
        })
        .collect()
}

/// ATR aligned with `closes`, `None` while the window is filling
pub fn calculate_atr_series(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let (highs, lows) = running_extremes(closes);
    let true_ranges = true_range_series(closes, &highs, &lows);
    sma_series(&true_ranges, period)
}

/// Latest ATR value, or None if insufficient data
pub fn calculate_atr(closes: &[f64], period: usize) -> Option<f64> {
    calculate_atr_series(closes, period).last().copied().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_extremes_are_monotonic() {
        let closes = vec![100.0, 97.0, 103.0, 99.0, 110.0, 95.0, 96.0];
        let (highs, lows) = running_extremes(&closes);

        assert_eq!(highs, vec![100.0, 100.0, 103.0, 103.0, 110.0, 110.0, 110.0]);
        assert_eq!(lows, vec![100.0, 97.0, 97.0, 97.0, 97.0, 95.0, 95.0]);

        for i in 1..closes.len() {
            assert!(highs[i] >= highs[i - 1]);
            assert!(lows[i] <= lows[i - 1]);
        }
    }

    #[test]
    fn test_first_true_range_is_zero() {
        let closes = vec![100.0, 102.0];
        let (highs, lows) = running_extremes(&closes);
        let tr = true_range_series(&closes, &highs, &lows);

        assert_eq!(tr, vec![0.0, 2.0]);
    }

    #[test]
    fn test_true_range_uses_previous_close() {
        // Running range 100..102 but previous close 95 dominates
        assert_eq!(true_range(102.0, 100.0, 95.0), 7.0);
        assert_eq!(true_range(102.0, 100.0, 101.0), 2.0);
    }

    #[test]
    fn test_atr_series() {
        let closes = vec![100.0, 102.0, 101.0, 105.0, 98.0];
        let atr = calculate_atr_series(&closes, 3);

        assert_eq!(atr.len(), 5);
        assert!(atr[0].is_none());
        assert!(atr[1].is_none());
        assert!((atr[2].unwrap() - 4.0 / 3.0).abs() < 1e-12);
        assert!((atr[3].unwrap() - 3.0).abs() < 1e-12);
        assert!((atr[4].unwrap() - 14.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_constant_prices_have_zero_atr() {
        let closes = vec![50.0; 12];
        let atr = calculate_atr_series(&closes, 5);

        for value in atr.iter().skip(4) {
            assert_eq!(*value, Some(0.0));
        }
    }

    #[test]
    fn test_insufficient_data() {
        assert!(calculate_atr(&[100.0, 101.0], 14).is_none());
        assert_eq!(calculate_atr(&[100.0, 101.0, 103.0], 3), Some(5.0 / 3.0));
    }
}
