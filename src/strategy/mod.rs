// Trading strategy module
pub mod decision;
pub mod session;
pub mod signals;

pub use decision::{Decision, DecisionEngine, PositionState};
pub use session::{StrategySession, TickOutcome};
pub use signals::{RecordFlags, SignalAccumulator};
