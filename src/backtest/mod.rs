pub mod replay;
pub mod synthetic;

pub use replay::ReplayFeed;
pub use synthetic::{MarketScenario, SyntheticKlineGenerator};
