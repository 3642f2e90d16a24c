// Price data collection and order execution module
pub mod executor;
pub mod price_cache;
pub mod price_feed;
pub mod runner;

pub use executor::{OrderExecutor, PaperExecutor};
pub use price_cache::PriceCache;
pub use price_feed::{PriceFeed, PriceFeedManager};
pub use runner::{run_session, RunOutcome};
