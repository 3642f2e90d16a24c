use crate::models::Kline;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Market scenario types for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Steady uptrend with noise
    Uptrend,
    /// Steady downtrend with noise
    Downtrend,
    /// Sideways/choppy market around the starting price
    Sideways,
    /// High volatility (±5% swings)
    Volatile,
    /// Flat first half, then a sharp 20% slide
    Crash,
}

impl std::str::FromStr for MarketScenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uptrend" => Ok(Self::Uptrend),
            "downtrend" => Ok(Self::Downtrend),
            "sideways" => Ok(Self::Sideways),
            "volatile" => Ok(Self::Volatile),
            "crash" => Ok(Self::Crash),
            other => Err(format!("unknown scenario '{}'", other)),
        }
    }
}

/// Generates reproducible synthetic klines for offline replays
pub struct SyntheticKlineGenerator {
    rng: StdRng,
    base_price: f64,
    start_time: DateTime<Utc>,
}

impl SyntheticKlineGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 30_000.0,
            // Fixed anchor so the same seed always yields the same klines
            start_time: DateTime::from_timestamp(1_700_000_000 - 1_700_000_000 % 3600, 0)
                .unwrap_or_default(),
        }
    }

    pub fn with_base_price(mut self, base_price: f64) -> Self {
        self.base_price = base_price;
        self
    }

    pub fn base_price(&self) -> f64 {
        self.base_price
    }

    /// Generate `count` klines spaced `interval_minutes` apart
    pub fn generate(
        &mut self,
        scenario: MarketScenario,
        count: usize,
        interval_minutes: i64,
    ) -> Vec<Kline> {
        let mut klines = Vec::with_capacity(count);
        let mut price = self.base_price;

        for i in 0..count {
            let open_time = self.start_time + Duration::minutes(i as i64 * interval_minutes);
            price = self.next_price(scenario, price, i, count);
            klines.push(self.create_kline(price, open_time));
        }

        klines
    }

    fn next_price(&mut self, scenario: MarketScenario, price: f64, i: usize, count: usize) -> f64 {
        let next = match scenario {
            MarketScenario::Uptrend => price * (1.0 + 0.004 + self.rng.gen_range(-0.002..0.002)),
            MarketScenario::Downtrend => {
                price * (1.0 - 0.004 + self.rng.gen_range(-0.002..0.002))
            }
            MarketScenario::Sideways => {
                // 10% pull back to the mean plus ±1% noise
                let reversion = (self.base_price - price) * 0.1;
                price + reversion + price * self.rng.gen_range(-0.01..0.01)
            }
            MarketScenario::Volatile => price * (1.0 + self.rng.gen_range(-0.05..0.05)),
            MarketScenario::Crash => {
                if i < count / 2 {
                    price * (1.0 + self.rng.gen_range(-0.001..0.001))
                } else {
                    let drop_rate = -0.20 / (count as f64 / 2.0).max(1.0);
                    price * (1.0 + drop_rate + self.rng.gen_range(-0.001..0.001))
                }
            }
        };

        // Keep prices strictly positive
        next.max(self.base_price * 0.01)
    }

    /// Intrabar high/low around the close
    fn create_kline(&mut self, close: f64, open_time: DateTime<Utc>) -> Kline {
        let noise_pct = 0.002;

        Kline {
            open_time,
            high: close * (1.0 + self.rng.gen_range(0.0..noise_pct)),
            low: close * (1.0 - self.rng.gen_range(0.0..noise_pct)),
            close,
        }
    }
}
