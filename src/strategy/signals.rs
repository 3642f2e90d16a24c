use crate::indicators::EnvelopePoint;
use crate::{Error, Result};

/// Which bounds to record on a streaming step
///
/// Supplied by the caller on every step rather than held as session-wide state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordFlags {
    pub upper: bool,
    pub lower: bool,
}

impl RecordFlags {
    pub const BOTH: RecordFlags = RecordFlags {
        upper: true,
        lower: true,
    };

    pub const NONE: RecordFlags = RecordFlags {
        upper: false,
        lower: false,
    };
}

impl Default for RecordFlags {
    fn default() -> Self {
        Self::BOTH
    }
}

/// Append-only history of the upper/lower bounds seen while streaming
///
/// Owned by one strategy session and cleared only when it restarts.
///
/// # Example
/// ```
/// use trendbot::strategy::signals::SignalAccumulator;
///
/// let mut signals = SignalAccumulator::new();
/// assert!(signals.latest_upper().is_err());
///
/// signals.record_upper(105.0);
/// signals.record_upper(106.5);
/// assert_eq!(signals.latest_upper().unwrap(), 106.5);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SignalAccumulator {
    upper_bounds: Vec<f64>,
    lower_bounds: Vec<f64>,
}

impl SignalAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_upper(&mut self, value: f64) {
        self.upper_bounds.push(value);
    }

    pub fn record_lower(&mut self, value: f64) {
        self.lower_bounds.push(value);
    }

    /// Record the bands of one envelope point according to `flags`
    pub fn record_point(&mut self, point: &EnvelopePoint, flags: RecordFlags) {
        if flags.upper {
            self.record_upper(point.upper);
        }
        if flags.lower {
            self.record_lower(point.lower);
        }
    }

    pub fn latest_upper(&self) -> Result<f64> {
        self.upper_bounds
            .last()
            .copied()
            .ok_or(Error::EmptyHistory("upper"))
    }

    pub fn latest_lower(&self) -> Result<f64> {
        self.lower_bounds
            .last()
            .copied()
            .ok_or(Error::EmptyHistory("lower"))
    }

    pub fn upper_bounds(&self) -> &[f64] {
        &self.upper_bounds
    }

    pub fn lower_bounds(&self) -> &[f64] {
        &self.lower_bounds
    }

    /// Session restart
    pub fn clear(&mut self) {
        self.upper_bounds.clear();
        self.lower_bounds.clear();
    }
}
