//! Runtime settings
//!
//! Loaded from built-in defaults, an optional TOML file and `TRENDBOT__*`
//! environment variables (e.g. `TRENDBOT__STRATEGY__SYMBOL=ETHUSDT`,
//! `TRENDBOT__BINANCE__API_KEY=...`). Credentials live here and are handed to
//! the exchange client at construction; nothing reads them from globals.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::strategy::signals::RecordFlags;
use crate::{Error, Result};

/// Kline intervals accepted by the exchange
pub const VALID_INTERVALS: &[&str] = &[
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w", "1M",
];

/// Largest history request the klines endpoint serves
pub const MAX_HISTORY_LIMIT: u32 = 1500;

const ENV_PREFIX: &str = "TRENDBOT";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub strategy: StrategyConfig,
    pub binance: BinanceConfig,
}

impl Settings {
    /// Load settings, layering an optional file and the environment over defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder()
            .add_source(::config::Config::try_from(&Settings::default())?);

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }

        let settings: Settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        settings.strategy.validate()?;
        Ok(settings)
    }
}

/// Everything one trading session needs to know
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StrategyConfig {
    pub symbol: String,
    pub interval: String,
    pub quantity: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub atr_period: usize,
    pub atr_multiplier: f64,
    /// Klines fetched to seed the envelope
    pub history_limit: u32,
    pub poll_interval_secs: u64,
    pub record_upper: bool,
    pub record_lower: bool,
    /// Start managing an already-held position instead of waiting in Idle
    pub assume_position_open: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            interval: "1h".to_string(),
            quantity: 0.001,
            stop_loss_pct: 0.02,   // 2% below trend
            take_profit_pct: 0.02, // 2% above trend
            atr_period: 10,
            atr_multiplier: 3.0,
            history_limit: 100,
            poll_interval_secs: 60,
            record_upper: true,
            record_lower: true,
            assume_position_open: true,
        }
    }
}

impl StrategyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(invalid("symbol must not be empty"));
        }
        if !VALID_INTERVALS.contains(&self.interval.as_str()) {
            return Err(invalid(format!("unknown kline interval '{}'", self.interval)));
        }
        if !self.quantity.is_finite() || self.quantity <= 0.0 {
            return Err(invalid(format!("quantity must be > 0, got {}", self.quantity)));
        }
        if !is_fraction(self.stop_loss_pct) {
            return Err(invalid(format!(
                "stop_loss_pct must be in (0, 1), got {}",
                self.stop_loss_pct
            )));
        }
        if !is_fraction(self.take_profit_pct) {
            return Err(invalid(format!(
                "take_profit_pct must be in (0, 1), got {}",
                self.take_profit_pct
            )));
        }
        if self.atr_period == 0 {
            return Err(invalid("atr_period must be > 0"));
        }
        if !self.atr_multiplier.is_finite() || self.atr_multiplier <= 0.0 {
            return Err(invalid(format!(
                "atr_multiplier must be > 0, got {}",
                self.atr_multiplier
            )));
        }
        if (self.history_limit as usize) < self.atr_period || self.history_limit > MAX_HISTORY_LIMIT {
            return Err(invalid(format!(
                "history_limit must be between atr_period ({}) and {}, got {}",
                self.atr_period, MAX_HISTORY_LIMIT, self.history_limit
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(invalid("poll_interval_secs must be > 0"));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn record_flags(&self) -> RecordFlags {
        RecordFlags {
            upper: self.record_upper,
            lower: self.record_lower,
        }
    }
}

/// Exchange endpoints, credentials and client limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BinanceConfig {
    /// Futures market data (klines)
    pub market_data_url: String,
    /// Spot trading (orders)
    pub trading_url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub request_timeout_secs: u64,
    pub requests_per_minute: u32,
    pub recv_window_ms: u64,
    pub retry_backoff_ms: u64,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            market_data_url: "https://fapi.binance.com".to_string(),
            trading_url: "https://api.binance.com".to_string(),
            api_key: None,
            api_secret: None,
            request_timeout_secs: 10,
            requests_per_minute: 1200,
            recv_window_ms: 5000,
            retry_backoff_ms: 500,
        }
    }
}

fn is_fraction(value: f64) -> bool {
    value.is_finite() && value > 0.0 && value < 1.0
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidParameter(message.into())
}
