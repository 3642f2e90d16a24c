// Technical indicators module
// Close-derived ATR and the trend envelope built on it

pub mod atr;
pub mod moving_average;
pub mod supertrend;

pub use atr::{calculate_atr, calculate_atr_series, running_extremes, true_range};
pub use moving_average::{sma_series, RollingSma};
pub use supertrend::{EnvelopeCalculator, EnvelopePoint, EnvelopeSeries, EnvelopeState};
