use std::collections::VecDeque;

/// SMA at every index, `None` until a full window is available
///
/// Output is aligned with the input: index `i` averages `values[i + 1 - period..=i]`.
pub fn sma_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }

    (0..values.len())
        .map(|i| {
            if i + 1 < period {
                None
            } else {
                Some(window_mean(values[i + 1 - period..=i].iter()))
            }
        })
        .collect()
}

/// Fixed-size trailing window producing the same SMA as `sma_series`
///
/// Holds only the last `period` values, so memory stays constant while streaming.
#[derive(Debug, Clone)]
pub struct RollingSma {
    period: usize,
    window: VecDeque<f64>,
}

impl RollingSma {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            window: VecDeque::with_capacity(period),
        }
    }

    /// Push a value and return the mean once the window is full
    pub fn push(&mut self, value: f64) -> Option<f64> {
        if self.period == 0 {
            return None;
        }

        self.window.push_back(value);
        while self.window.len() > self.period {
            self.window.pop_front();
        }

        if self.window.len() < self.period {
            return None;
        }

        // Oldest to newest, same summation order as the batch slices
        Some(window_mean(self.window.iter()))
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

fn window_mean<'a>(values: impl ExactSizeIterator<Item = &'a f64>) -> f64 {
    let count = values.len();
    values.sum::<f64>() / count as f64
}
