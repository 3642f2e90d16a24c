use crate::models::validate_price;
use crate::{Error, Result};

/// Lifecycle of the single position a session manages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    Idle,
    PositionOpen,
    /// Terminal for the session
    Closed,
}

/// Outcome of evaluating one price against the trend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    StopLossExit,
    TakeProfitExit,
    Hold,
}

impl Decision {
    pub fn is_exit(&self) -> bool {
        !matches!(self, Decision::Hold)
    }
}

/// Stop-loss / take-profit state machine around the trend line
///
/// Percentages are fractional (0.02 = 2%). Stop-loss is checked before
/// take-profit, so if a configuration lets both thresholds be crossed by the
/// same price, stop-loss wins.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    stop_loss_pct: f64,
    take_profit_pct: f64,
    state: PositionState,
}

impl DecisionEngine {
    pub fn new(stop_loss_pct: f64, take_profit_pct: f64) -> Result<Self> {
        if !stop_loss_pct.is_finite() || stop_loss_pct >= 1.0 {
            return Err(Error::InvalidParameter(format!(
                "stop-loss pct must be finite and < 1, got {}",
                stop_loss_pct
            )));
        }
        if !take_profit_pct.is_finite() || take_profit_pct <= -1.0 {
            return Err(Error::InvalidParameter(format!(
                "take-profit pct must be finite and > -1, got {}",
                take_profit_pct
            )));
        }

        Ok(Self {
            stop_loss_pct,
            take_profit_pct,
            state: PositionState::Idle,
        })
    }

    pub fn state(&self) -> PositionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == PositionState::Closed
    }

    /// External entry decision: Idle -> PositionOpen
    pub fn open_position(&mut self) -> Result<()> {
        match self.state {
            PositionState::Idle => {
                self.state = PositionState::PositionOpen;
                Ok(())
            }
            other => Err(Error::InvalidState(format!(
                "cannot open a position from {:?}",
                other
            ))),
        }
    }

    pub fn stop_loss_threshold(&self, trend: f64) -> f64 {
        (1.0 - self.stop_loss_pct) * trend
    }

    pub fn take_profit_threshold(&self, trend: f64) -> f64 {
        (1.0 + self.take_profit_pct) * trend
    }

    /// Evaluate the latest price against the current trend value
    ///
    /// Only valid while a position is open. An exit moves the engine to `Closed`.
    pub fn evaluate(&mut self, price: f64, trend: f64) -> Result<Decision> {
        validate_price("latest", price)?;
        if !trend.is_finite() {
            return Err(Error::InvalidInput(format!("trend value {} is not finite", trend)));
        }

        if self.state != PositionState::PositionOpen {
            return Err(Error::InvalidState(format!(
                "no open position to evaluate (state {:?})",
                self.state
            )));
        }

        let decision = if price <= self.stop_loss_threshold(trend) {
            Decision::StopLossExit
        } else if price >= self.take_profit_threshold(trend) {
            Decision::TakeProfitExit
        } else {
            Decision::Hold
        };

        if decision.is_exit() {
            self.state = PositionState::Closed;
        }

        Ok(decision)
    }
}
