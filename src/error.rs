use thiserror::Error;

/// Errors produced by the trading core and its collaborators
#[derive(Debug, Error)]
pub enum Error {
    /// Bad period, multiplier, percentage or other configuration value
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A price sample that cannot be used (NaN, negative, out of order)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Accumulator queried before anything was recorded
    #[error("No {0} bound recorded yet")]
    EmptyHistory(&'static str),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Exchange rejected a market data request
    #[error("Exchange API error: {0}")]
    Api(String),

    #[error("Order failed: {0}")]
    OrderFailure(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Feed errors the loop should log and retry on the next tick
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::RateLimited(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(e.to_string())
    }
}
